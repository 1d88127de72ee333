#![forbid(unsafe_code)]

use crate::error::Error;
use config::{CheckConfig, CheckKind, Level};
use std::{fmt, time::Duration};

pub const DEFAULT_EVERY: Duration = Duration::from_secs(5);
pub const DEFAULT_ACTION: &str = "restart";

const MIB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    Memory,
    Cpu,
    Alive,
    Identity,
}

impl Metric {
    /// Whether samples of this metric are compared against a threshold.
    pub fn is_bounded(self) -> bool {
        matches!(self, Metric::Memory | Metric::Cpu)
    }

    /// Render a sampled value the way breach messages show it.
    pub fn format_value(self, value: f64) -> String {
        match self {
            Metric::Memory => format!("{}Mb", (value / MIB).floor() as u64),
            Metric::Cpu => format!("{}%", value.round() as i64),
            Metric::Alive | Metric::Identity => format!("{value}"),
        }
    }
}

impl From<CheckKind> for Metric {
    fn from(kind: CheckKind) -> Self {
        match kind {
            CheckKind::Memory => Metric::Memory,
            CheckKind::Cpu => Metric::Cpu,
            CheckKind::Alive => Metric::Alive,
            CheckKind::Identity => Metric::Identity,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Metric::Memory => "memory",
            Metric::Cpu => "cpu",
            Metric::Alive => "alive",
            Metric::Identity => "identity",
        })
    }
}

/// The bound a healthy sample satisfies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparator {
    Below,
    Above,
    Equal,
}

impl Comparator {
    pub fn symbol(self) -> char {
        match self {
            Comparator::Below => '<',
            Comparator::Above => '>',
            Comparator::Equal => '=',
        }
    }

    pub fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparator::Below => value < threshold,
            Comparator::Above => value > threshold,
            Comparator::Equal => value == threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bound {
    pub comparator: Comparator,
    pub threshold: f64,
}

/// A validated check, ready to drive a [`Watcher`](crate::Watcher).
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub name: String,
    pub metric: Metric,
    /// Present exactly for bounded metrics.
    pub bound: Option<Bound>,
    pub times: u32,
    pub every: Duration,
    pub action: String,
    pub level: Level,
}

impl Condition {
    /// Validate one configured check.
    pub fn from_config(name: &str, check: &CheckConfig) -> Result<Self, Error> {
        let metric: Metric = check
            .kind_or_name(name)
            .ok_or_else(|| Error::invalid_check(name, "missing `type`"))?
            .into();

        let bounds = [
            check.below.map(|threshold| (Comparator::Below, threshold)),
            check.above.map(|threshold| (Comparator::Above, threshold)),
            check.equal.map(|threshold| (Comparator::Equal, threshold)),
        ];
        let mut bounds = bounds.into_iter().flatten();
        let bound = match (metric.is_bounded(), bounds.next(), bounds.next()) {
            (true, Some((comparator, threshold)), None) => Some(Bound {
                comparator,
                threshold,
            }),
            (true, None, _) => {
                return Err(Error::invalid_check(
                    name,
                    "needs one of `below`, `above` or `equal`",
                ));
            }
            (true, Some(_), Some(_)) => {
                return Err(Error::invalid_check(
                    name,
                    "only one of `below`, `above` or `equal` may be set",
                ));
            }
            (false, None, _) => None,
            (false, Some(_), _) => {
                return Err(Error::invalid_check(
                    name,
                    format!("`{metric}` checks take no threshold"),
                ));
            }
        };

        let times = check.times.unwrap_or(1);
        if times == 0 {
            return Err(Error::invalid_check(name, "`times` must be at least 1"));
        }
        let every = check.every.unwrap_or(DEFAULT_EVERY);
        if every.is_zero() {
            return Err(Error::invalid_check(name, "`every` must be positive"));
        }

        Ok(Self {
            name: name.to_owned(),
            metric,
            bound,
            times,
            every,
            action: check
                .action
                .clone()
                .unwrap_or_else(|| DEFAULT_ACTION.to_owned()),
            level: check.level.unwrap_or_default(),
        })
    }

    /// Built-in condition for the parent `alive`/`identity` watchers.
    pub fn builtin(metric: Metric) -> Self {
        Self {
            name: metric.to_string(),
            metric,
            bound: None,
            times: 1,
            every: DEFAULT_EVERY,
            action: DEFAULT_ACTION.to_owned(),
            level: Level::default(),
        }
    }

    /// A sample breaches when it violates the bound. Unbounded metrics never
    /// breach; they end the watcher instead.
    pub fn breaches(&self, value: f64) -> bool {
        self.bound
            .is_some_and(|bound| !bound.comparator.holds(value, bound.threshold))
    }

    pub fn format_value(&self, value: f64) -> String {
        self.metric.format_value(value)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bound {
            Some(bound) => write!(
                f,
                "{}({}{})",
                self.metric,
                bound.comparator.symbol(),
                self.format_value(bound.threshold)
            ),
            None => write!(f, "{}", self.metric),
        }
    }
}

/// Validate every check of a set, in name order.
pub fn build_conditions<'a, I>(checks: I) -> Result<Vec<Condition>, Error>
where
    I: IntoIterator<Item = (&'a String, &'a CheckConfig)>,
{
    checks
        .into_iter()
        .map(|(name, check)| Condition::from_config(name, check))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    const MB: f64 = 1024.0 * 1024.0;

    fn memory_below(mb: f64) -> CheckConfig {
        CheckConfig {
            below: Some(mb * MB),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_fill_in() {
        let condition = Condition::from_config("memory", &memory_below(50.0)).unwrap();
        assert_eq!(condition.metric, Metric::Memory);
        assert_eq!(condition.times, 1);
        assert_eq!(condition.every, DEFAULT_EVERY);
        assert_eq!(condition.action, "restart");
        assert_eq!(condition.level, Level::Warn);
    }

    #[test]
    fn below_breaches_at_or_over_threshold() {
        let condition = Condition::from_config("memory", &memory_below(50.0)).unwrap();
        assert!(condition.breaches(55.0 * MB));
        assert!(condition.breaches(50.0 * MB));
        assert!(!condition.breaches(49.0 * MB));
    }

    #[test]
    fn above_and_equal_bounds() {
        let above = CheckConfig {
            kind: Some(CheckKind::Cpu),
            above: Some(10.0),
            ..Default::default()
        };
        let above = Condition::from_config("busy", &above).unwrap();
        assert!(above.breaches(5.0));
        assert!(!above.breaches(11.0));

        let equal = CheckConfig {
            kind: Some(CheckKind::Cpu),
            equal: Some(0.0),
            ..Default::default()
        };
        let equal = Condition::from_config("idle", &equal).unwrap();
        assert!(!equal.breaches(0.0));
        assert!(equal.breaches(1.0));
    }

    #[test]
    fn rejects_invalid_checks() {
        let zero_times = CheckConfig {
            times: Some(0),
            ..memory_below(1.0)
        };
        assert!(Condition::from_config("memory", &zero_times).is_err());

        let zero_every = CheckConfig {
            every: Some(Duration::ZERO),
            ..memory_below(1.0)
        };
        assert!(Condition::from_config("memory", &zero_every).is_err());

        let two_bounds = CheckConfig {
            above: Some(1.0),
            ..memory_below(10.0)
        };
        assert!(Condition::from_config("memory", &two_bounds).is_err());

        assert!(Condition::from_config("memory", &CheckConfig::default()).is_err());
        assert!(Condition::from_config("mystery", &memory_below(1.0)).is_err());
        assert!(Condition::from_config("alive", &memory_below(1.0)).is_err());
    }

    #[test]
    fn unbounded_checks_never_breach() {
        let alive = Condition::from_config("alive", &CheckConfig::default()).unwrap();
        assert_eq!(alive.bound, None);
        assert!(!alive.breaches(0.0));
        assert_eq!(alive.to_string(), "alive");
    }

    #[test]
    fn describes_itself() {
        let memory = Condition::from_config("memory", &memory_below(50.0)).unwrap();
        assert_eq!(memory.to_string(), "memory(<50Mb)");

        let cpu = CheckConfig {
            above: Some(90.0),
            ..Default::default()
        };
        let cpu = Condition::from_config("cpu", &cpu).unwrap();
        assert_eq!(cpu.to_string(), "cpu(>90%)");
    }

    #[test]
    fn formats_values() {
        assert_eq!(Metric::Memory.format_value(55.0 * MB + 1000.0), "55Mb");
        assert_eq!(Metric::Cpu.format_value(49.6), "50%");
    }

    #[test]
    fn builds_in_name_order() {
        let mut checks = config::Checks::new();
        checks.insert("memory".into(), memory_below(50.0));
        checks.insert(
            "cpu".into(),
            CheckConfig {
                below: Some(80.0),
                ..Default::default()
            },
        );
        let names: Vec<_> = build_conditions(&checks)
            .unwrap()
            .into_iter()
            .map(|condition| condition.name)
            .collect();
        assert_eq!(names, ["cpu", "memory"]);
    }

    proptest! {
        #[test]
        fn below_is_the_complement_of_its_bound(value in 0.0f64..1e12, threshold in 0.0f64..1e12) {
            let condition = Condition::from_config("memory", &CheckConfig {
                below: Some(threshold),
                ..Default::default()
            }).unwrap();
            prop_assert_eq!(condition.breaches(value), value >= threshold);
        }
    }
}
