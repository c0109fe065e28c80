//! Routing-key algebra.
//!
//! Routing keys are dot-separated three-tuples `<root>.<workflow>.<action>`.
//! `<root>` is a fixed installation tag (normally `nlds`), `<workflow>`
//! selects the consumer queue, and `<action>` selects the step. Every
//! consumer appends its own name to `details.route` before re-publishing;
//! the routing key itself *is* the program counter for the whole engine.

use crate::error::NldsError;
use std::fmt;
use std::str::FromStr;

/// Installation-wide routing root, e.g. `nlds`.
pub const ROOT: &str = "nlds";

/// Wildcard queue-binding token.
pub const WILD: &str = "*";

/// `<workflow>` segment: selects the consumer queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Workflow {
    Index,
    Catalog,
    Transfer,
    Archive,
    Route,
    Monitor,
    Log,
}

impl Workflow {
    fn as_str(&self) -> &'static str {
        match self {
            Workflow::Index => "index",
            Workflow::Catalog => "cat",
            Workflow::Transfer => "tran",
            Workflow::Archive => "archive",
            Workflow::Route => "route",
            Workflow::Monitor => "monitor",
            Workflow::Log => "log",
        }
    }
}

impl fmt::Display for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Workflow {
    type Err = NldsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "index" => Ok(Workflow::Index),
            "cat" => Ok(Workflow::Catalog),
            "tran" => Ok(Workflow::Transfer),
            "archive" => Ok(Workflow::Archive),
            "route" => Ok(Workflow::Route),
            "monitor" => Ok(Workflow::Monitor),
            "log" => Ok(Workflow::Log),
            other => Err(NldsError::InvalidRoutingKey {
                key: other.to_string(),
                reason: "unrecognised workflow segment".to_string(),
            }),
        }
    }
}

/// `<action>` segment: selects the step within a workflow, or (for the
/// `LOG` workflow) the log level the message was emitted at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Init,
    Start,
    Complete,
    Failed,
    Next,
    LogInfo,
    LogWarn,
    LogErr,
    LogDebug,
    LogCritical,
    Wild,
}

impl Action {
    fn as_str(&self) -> &'static str {
        match self {
            Action::Init => "init",
            Action::Start => "start",
            Action::Complete => "complete",
            Action::Failed => "failed",
            Action::Next => "next",
            Action::LogInfo => "info",
            Action::LogWarn => "warn",
            Action::LogErr => "err",
            Action::LogDebug => "debug",
            Action::LogCritical => "critical",
            Action::Wild => WILD,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Action {
    type Err = NldsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "init" => Ok(Action::Init),
            "start" => Ok(Action::Start),
            "complete" => Ok(Action::Complete),
            "failed" => Ok(Action::Failed),
            "next" => Ok(Action::Next),
            "info" => Ok(Action::LogInfo),
            "warn" => Ok(Action::LogWarn),
            "err" => Ok(Action::LogErr),
            "debug" => Ok(Action::LogDebug),
            "critical" => Ok(Action::LogCritical),
            WILD => Ok(Action::Wild),
            other => Err(NldsError::InvalidRoutingKey {
                key: other.to_string(),
                reason: "unrecognised action segment".to_string(),
            }),
        }
    }
}

/// A parsed, validated routing key: `<root>.<workflow>.<action>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutingKey {
    pub root: String,
    pub workflow: Workflow,
    pub action: Action,
}

impl RoutingKey {
    pub fn new(root: impl Into<String>, workflow: Workflow, action: Action) -> Self {
        Self {
            root: root.into(),
            workflow,
            action,
        }
    }

    /// Parse a raw routing-key string, enforcing exactly three
    /// dot-separated parts and a recognised action verb.
    pub fn parse(key: &str) -> Result<Self, NldsError> {
        let parts: Vec<&str> = key.split('.').collect();
        if parts.len() != 3 {
            return Err(NldsError::InvalidRoutingKey {
                key: key.to_string(),
                reason: format!("expected 3 dot-separated parts, got {}", parts.len()),
            });
        }
        let root = parts[0].to_string();
        if root.is_empty() {
            return Err(NldsError::InvalidRoutingKey {
                key: key.to_string(),
                reason: "root segment is empty".to_string(),
            });
        }
        let workflow = parts[1].parse()?;
        let action = parts[2].parse()?;
        Ok(Self {
            root,
            workflow,
            action,
        })
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.root, self.workflow, self.action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_key() {
        let rk = RoutingKey::parse("nlds.cat.complete").unwrap();
        assert_eq!(rk.root, "nlds");
        assert_eq!(rk.workflow, Workflow::Catalog);
        assert_eq!(rk.action, Action::Complete);
        assert_eq!(rk.to_string(), "nlds.cat.complete");
    }

    #[test]
    fn rejects_wrong_arity() {
        assert!(RoutingKey::parse("nlds.cat").is_err());
        assert!(RoutingKey::parse("nlds.cat.complete.extra").is_err());
    }

    #[test]
    fn rejects_unknown_workflow() {
        assert!(RoutingKey::parse("nlds.bogus.complete").is_err());
    }

    #[test]
    fn rejects_unknown_action() {
        assert!(RoutingKey::parse("nlds.cat.bogus").is_err());
    }

    #[test]
    fn wildcard_action_round_trips() {
        let rk = RoutingKey::new(ROOT, Workflow::Index, Action::Wild);
        assert_eq!(rk.to_string(), "nlds.index.*");
    }

    #[test]
    fn log_level_actions_round_trip() {
        for key in ["nlds.log.info", "nlds.log.warn", "nlds.log.err", "nlds.log.debug", "nlds.log.critical"] {
            let rk = RoutingKey::parse(key).unwrap();
            assert_eq!(rk.workflow, Workflow::Log);
            assert_eq!(rk.to_string(), key);
        }
    }
}
