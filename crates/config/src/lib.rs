#![forbid(unsafe_code)]

mod check;
mod error;
mod level;
pub mod merge;
mod model;
mod resolve;

pub use check::{CheckConfig, CheckKind, Checks, MonitorChildren};
pub use error::Error;
pub use level::{Level, NotifyMap};
pub use model::{Application, Engine, Group, ProbeKind, Process};
pub use resolve::{PidSource, ResolvedMonitorChildren, ResolvedProcess};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::Path};

/// Prefix of environment variables overriding configuration keys.
/// Nested keys are separated by a double underscore, e.g.
/// `PROCWATCH_ENGINE__PROBE=sysinfo`.
pub const ENV_PREFIX: &str = "PROCWATCH_";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub engine: Engine,

    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub applications: BTreeMap<String, Application>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a single configuration file on top of the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        Self::load_layered([path])
    }

    /// Load several files, each deep-merged over the previous one, then apply
    /// environment overrides.
    pub fn load_layered<I, P>(paths: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        for path in paths {
            let path = path.as_ref();
            if !path.is_file() {
                return Err(Error::InvalidPath(path.to_owned()));
            }
            figment = figment.merge(Toml::file(path));
        }
        Ok(figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?)
    }

    pub fn from_toml_str(toml: &str) -> Result<Self, Error> {
        Ok(Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::string(toml))
            .extract()?)
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String, Error> {
        Ok(toml_edit::ser::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::{io::Write, path::PathBuf, time::Duration};
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_without_file() {
        let config = Config::new();
        assert_eq!(config.engine.probe, ProbeKind::Auto);
        assert_eq!(config.engine.proc_root, PathBuf::from("/proc"));
        assert_eq!(config.engine.children_update_period, Duration::from_secs(30));
        assert!(config.applications.is_empty());
    }

    #[test]
    fn later_files_override_earlier_ones() {
        let base = write_config(
            r#"
            [engine]
            probe = "procfs"
            children_update_period = 20

            [applications.web.monitor_children.checks.memory]
            below = 100
            times = 3
            "#,
        );
        let overlay = write_config(
            r#"
            [applications.web.monitor_children.checks.memory]
            times = 2
            "#,
        );

        let config = Config::load_layered([base.path(), overlay.path()]).unwrap();

        assert_eq!(config.engine.probe, ProbeKind::Procfs);
        assert_eq!(config.engine.children_update_period, Duration::from_secs(20));
        let memory = &config.applications["web"]
            .monitor_children
            .as_ref()
            .unwrap()
            .checks["memory"];
        assert_eq!(memory.below, Some(100.0));
        assert_eq!(memory.times, Some(2));
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = Config::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, Error::InvalidPath(_)));
    }

    #[test]
    fn unknown_level_is_rejected() {
        let err = Config::from_toml_str(
            r#"
            [applications.web]
            notify = { vasya = "petya" }
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Figment(_)));
    }

    #[test]
    fn renders_back_to_toml() {
        let config = Config::from_toml_str(
            r#"
            [applications.web.processes.unicorn]
            pid = 10
            notify = { ops = "error" }
            "#,
        )
        .unwrap();
        let rendered = config.to_toml_string().unwrap();
        let reparsed = Config::from_toml_str(&rendered).unwrap();
        assert_eq!(reparsed, config);
    }
}
