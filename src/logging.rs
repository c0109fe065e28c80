//! Logging consumer (spec §11, grounded in `nlds_processors/logger.py`):
//! every envelope addressed to the `LOG` routing-key family
//! (`nlds.log.{info,warn,err,debug,critical}`) carries a free-text
//! message and the name of the consumer that emitted it; this module
//! turns that into a `tracing` event at the matching level, keyed by
//! `transaction_id`/`sub_id`/`log_target` so a single transaction's
//! path through consumers can be grepped out of aggregate log output.
//!
//! It does not reimplement `tracing`'s own sink: process-wide
//! subscriber setup (`tracing_subscriber::fmt`, env-filter directives)
//! lives in each `src/bin/*.rs` entry point, per [`crate::config::LoggingConfig`].

use crate::monitor::state::LogLevel;
use crate::protocol::envelope::{Details, Envelope, MessageType};
use crate::protocol::routing::{Action, RoutingKey, Workflow, ROOT};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Payload carried in `data` for a `LOG`-type envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub log_level: LogLevel,
    pub log_target: String,
    pub message: String,
}

/// Build a `LOG`-type envelope addressed to `nlds.log.<level>`, for a
/// consumer reporting free-text progress against an existing
/// transaction (spec §11).
pub fn log_envelope(
    transaction_id: Uuid,
    sub_id: Uuid,
    log_target: &str,
    level: LogLevel,
    message: impl Into<String>,
) -> (RoutingKey, Envelope) {
    let mut details = Details::new("system", "system", "LOG");
    details.transaction_id = transaction_id;
    details.sub_id = sub_id;

    let record = LogRecord {
        log_level: level,
        log_target: log_target.to_string(),
        message: message.into(),
    };
    let envelope = Envelope::new(
        details,
        serde_json::to_value(&record).unwrap_or(serde_json::Value::Null),
        MessageType::Log,
    );

    let action = match level {
        LogLevel::Info => Action::LogInfo,
        LogLevel::Warn => Action::LogWarn,
        LogLevel::Error => Action::LogErr,
        LogLevel::Debug => Action::LogDebug,
        LogLevel::Critical => Action::LogCritical,
    };
    (RoutingKey::new(ROOT, Workflow::Log, action), envelope)
}

/// Build a `LOG`-type envelope addressed to `nlds.monitor.<level>`,
/// mirroring [`log_envelope`] onto the live-monitoring routing key
/// (spec §11, grounded in `nlds_processors/monitor.py`, which binds the
/// same level-tagged action space as the logger but under the
/// `monitor` workflow segment).
pub fn monitor_envelope(
    transaction_id: Uuid,
    sub_id: Uuid,
    log_target: &str,
    level: LogLevel,
    message: impl Into<String>,
) -> (RoutingKey, Envelope) {
    let mut details = Details::new("system", "system", "LOG");
    details.transaction_id = transaction_id;
    details.sub_id = sub_id;

    let record = LogRecord {
        log_level: level,
        log_target: log_target.to_string(),
        message: message.into(),
    };
    let envelope = Envelope::new(
        details,
        serde_json::to_value(&record).unwrap_or(serde_json::Value::Null),
        MessageType::Log,
    );

    let action = match level {
        LogLevel::Info => Action::LogInfo,
        LogLevel::Warn => Action::LogWarn,
        LogLevel::Error => Action::LogErr,
        LogLevel::Debug => Action::LogDebug,
        LogLevel::Critical => Action::LogCritical,
    };
    (RoutingKey::new(ROOT, Workflow::Monitor, action), envelope)
}

/// Dispatch one received `LOG` envelope to the `tracing` macro matching
/// its level, tagged with the target consumer name and the
/// transaction/sub ids so the whole transaction's trail can be filtered
/// out of aggregate output.
pub fn dispatch(envelope: &Envelope) -> Result<(), crate::error::NldsError> {
    let record: LogRecord = serde_json::from_value(envelope.data.clone())?;
    let transaction_id = envelope.details.transaction_id;
    let sub_id = envelope.details.sub_id;

    match record.log_level {
        LogLevel::Debug => debug!(%transaction_id, %sub_id, log_target = %record.log_target, "{}", record.message),
        LogLevel::Info => info!(%transaction_id, %sub_id, log_target = %record.log_target, "{}", record.message),
        LogLevel::Warn => warn!(%transaction_id, %sub_id, log_target = %record.log_target, "{}", record.message),
        LogLevel::Error | LogLevel::Critical => {
            error!(%transaction_id, %sub_id, log_target = %record.log_target, "{}", record.message)
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_envelope_round_trips_through_dispatch() {
        let (key, envelope) = log_envelope(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "catalog-put",
            LogLevel::Warn,
            "holding already exists, appending",
        );
        assert_eq!(key.to_string(), "nlds.log.warn");
        assert!(dispatch(&envelope).is_ok());
    }

    #[test]
    fn monitor_envelope_uses_the_monitor_workflow() {
        let (key, envelope) = monitor_envelope(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "archive",
            LogLevel::Info,
            "archive-put: 3 members archived, 0 failed",
        );
        assert_eq!(key.to_string(), "nlds.monitor.info");
        assert!(dispatch(&envelope).is_ok());
    }

    #[test]
    fn dispatch_rejects_malformed_payload() {
        let details = Details::new("system", "system", "LOG");
        let envelope = Envelope::new(details, serde_json::json!({"nonsense": true}), MessageType::Log);
        assert!(dispatch(&envelope).is_err());
    }
}
