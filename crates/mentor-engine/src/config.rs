//! Engine tunables.
//!
//! Every constant the engine's rules depend on lives here so callers can
//! load them from configuration instead of relying on literals. All fields
//! default to the values the platform runs with.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Skew tolerated when resolving a mentor's occurrences.
    pub mentor_grace_hours: i64,
    /// How long a closed partnership request blocks the same pair.
    pub rematch_cooldown_hours: i64,
    /// How long a pending request may wait for a response.
    pub request_expiry_hours: i64,
    /// Minimum lead between accepting a request and the course start.
    pub course_start_lead_hours: i64,
    /// Tail appended to a partnership schedule after the course duration.
    pub schedule_grace_days: i64,
    /// Enrolled students required before a partnership course activates.
    pub min_students_for_activation: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mentor_grace_hours: 3,
            rematch_cooldown_hours: 168,
            request_expiry_hours: 48,
            course_start_lead_hours: 48,
            schedule_grace_days: 3,
            min_students_for_activation: 1,
        }
    }
}

impl EngineConfig {
    /// Reject values that would make the rules degenerate.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let non_negative = [
            ("mentor_grace_hours", self.mentor_grace_hours),
            ("course_start_lead_hours", self.course_start_lead_hours),
            ("schedule_grace_days", self.schedule_grace_days),
        ];
        for (name, value) in non_negative {
            if value < 0 {
                return Err(EngineError::InvalidConfig(format!(
                    "{name} must not be negative, got {value}"
                )));
            }
        }
        let positive = [
            ("rematch_cooldown_hours", self.rematch_cooldown_hours),
            ("request_expiry_hours", self.request_expiry_hours),
        ];
        for (name, value) in positive {
            if value <= 0 {
                return Err(EngineError::InvalidConfig(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }
        let spans = [
            ("mentor_grace_hours", Duration::try_hours(self.mentor_grace_hours)),
            ("rematch_cooldown_hours", Duration::try_hours(self.rematch_cooldown_hours)),
            ("request_expiry_hours", Duration::try_hours(self.request_expiry_hours)),
            ("course_start_lead_hours", Duration::try_hours(self.course_start_lead_hours)),
            ("schedule_grace_days", Duration::try_days(self.schedule_grace_days)),
        ];
        if let Some((name, _)) = spans.iter().find(|(_, span)| span.is_none()) {
            return Err(EngineError::InvalidConfig(format!("{name} is out of range")));
        }
        Ok(())
    }

    // Out-of-range values saturate; `validate` reports them.

    pub fn mentor_grace(&self) -> Duration {
        Duration::try_hours(self.mentor_grace_hours).unwrap_or(Duration::MAX)
    }

    pub fn rematch_cooldown(&self) -> Duration {
        Duration::try_hours(self.rematch_cooldown_hours).unwrap_or(Duration::MAX)
    }

    pub fn request_expiry(&self) -> Duration {
        Duration::try_hours(self.request_expiry_hours).unwrap_or(Duration::MAX)
    }

    pub fn course_start_lead(&self) -> Duration {
        Duration::try_hours(self.course_start_lead_hours).unwrap_or(Duration::MAX)
    }

    pub fn schedule_grace(&self) -> Duration {
        Duration::try_days(self.schedule_grace_days).unwrap_or(Duration::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_platform_constants() {
        let config = EngineConfig::default();
        assert_eq!(config.mentor_grace(), Duration::hours(3));
        assert_eq!(config.rematch_cooldown(), Duration::hours(168));
        assert_eq!(config.request_expiry(), Duration::hours(48));
        assert_eq!(config.schedule_grace(), Duration::days(3));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_document_takes_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"rematch_cooldown_hours": 24}"#).unwrap();
        assert_eq!(config.rematch_cooldown_hours, 24);
        assert_eq!(config.mentor_grace_hours, 3);
        assert_eq!(config.min_students_for_activation, 1);
    }

    #[test]
    fn test_zero_expiry_rejected() {
        let config = EngineConfig {
            request_expiry_hours: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidConfig(msg) if msg.contains("request_expiry_hours")
        ));
    }

    #[test]
    fn test_out_of_range_cooldown_rejected_and_saturates() {
        let config = EngineConfig {
            rematch_cooldown_hours: i64::MAX,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidConfig(msg) if msg.contains("rematch_cooldown_hours")
        ));
        assert_eq!(config.rematch_cooldown(), Duration::MAX);
    }

    #[test]
    fn test_negative_grace_rejected() {
        let config = EngineConfig {
            mentor_grace_hours: -1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
