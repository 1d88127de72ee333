use crate::Error;
use std::{fmt, str::FromStr};

const PPID_EQ: &str = "State.Ppid.eq=";

/// A process listing predicate.
///
/// Only "parent PID equals" is supported, written `State.Ppid.eq=<pid>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessQuery {
    ParentPid(u32),
}

impl FromStr for ProcessQuery {
    type Err = Error;

    fn from_str(query: &str) -> Result<Self, Self::Err> {
        query
            .trim()
            .strip_prefix(PPID_EQ)
            .and_then(|pid| pid.parse().ok())
            .map(Self::ParentPid)
            .ok_or_else(|| Error::InvalidQuery(query.to_string()))
    }
}

impl fmt::Display for ProcessQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParentPid(pid) => write!(f, "{PPID_EQ}{pid}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_parent_pid_query() {
        assert_eq!(
            "State.Ppid.eq=42".parse::<ProcessQuery>().unwrap(),
            ProcessQuery::ParentPid(42)
        );
        assert_eq!(ProcessQuery::ParentPid(42).to_string(), "State.Ppid.eq=42");
    }

    #[test]
    fn rejects_other_shapes() {
        for query in ["", "State.Ppid.eq=", "State.Ppid.eq=abc", "State.Name.eq=ruby", "42"] {
            assert!(matches!(
                query.parse::<ProcessQuery>(),
                Err(Error::InvalidQuery(_))
            ));
        }
    }
}
