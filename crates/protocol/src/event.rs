//! Change event structure and the greeting line.
//!
//! A [`ChangeEvent`] only says *that* the watched file changed and when.
//! It carries no information about what changed.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Kind of change reported to subscribers.
///
/// Serialized in lowercase, e.g. `"changed"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// The watched file was modified, replaced or removed.
    Changed,
}

/// A single change notification.
///
/// Wire form: `{"type":"changed","timestamp":<epoch millis>}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Event kind, serialized under the `type` key.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl ChangeEvent {
    /// Create a `changed` event with an explicit timestamp.
    #[must_use]
    pub const fn changed(timestamp: u64) -> Self {
        Self {
            kind: EventKind::Changed,
            timestamp,
        }
    }

    /// Create a `changed` event stamped with the current wall clock time.
    #[must_use]
    pub fn now() -> Self {
        Self::changed(epoch_millis(SystemTime::now()))
    }
}

/// Milliseconds since the Unix epoch, saturating to 0 for pre-epoch clocks.
#[must_use]
pub fn epoch_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Build the greeting line sent to a subscriber right after it connects.
///
/// The returned string always ends with exactly one `\n`. Newlines in the
/// path are escaped so the greeting stays a single frame.
#[must_use]
pub fn greeting(path: &Path) -> String {
    let shown = path.display().to_string().replace('\n', "\\n");
    format!("Now watching \"{shown}\" for changes...\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn test_change_event_wire_shape() {
        let event = ChangeEvent::changed(1_525_549_135);
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"changed","timestamp":1525549135}"#);
    }

    #[test]
    fn test_change_event_parses_spaced_json() {
        // Senders are free to add whitespace between tokens.
        let event: ChangeEvent =
            serde_json::from_str(r#"{"type": "changed", "timestamp": 1525549135}"#).unwrap();
        assert_eq!(event, ChangeEvent::changed(1_525_549_135));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let result: Result<ChangeEvent, _> =
            serde_json::from_str(r#"{"type":"deleted","timestamp":1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_epoch_millis() {
        let t = UNIX_EPOCH + Duration::from_millis(1_525_549_135_123);
        assert_eq!(epoch_millis(t), 1_525_549_135_123);
        assert_eq!(epoch_millis(UNIX_EPOCH - Duration::from_secs(1)), 0);
    }

    #[test]
    fn test_now_is_after_2018() {
        assert!(ChangeEvent::now().timestamp > 1_525_549_135_000);
    }

    #[test]
    fn test_greeting_single_line() {
        let line = greeting(&PathBuf::from("/tmp/target.txt"));
        assert_eq!(line, "Now watching \"/tmp/target.txt\" for changes...\n");

        let odd = greeting(&PathBuf::from("/tmp/a\nb"));
        assert_eq!(odd.matches('\n').count(), 1);
        assert!(odd.ends_with('\n'));
    }
}
