//! Optional plausibility checks between the parser and the store
//!
//! The parser only guarantees that a line is well formed. When
//! [`ValidationPolicy::Reject`] is configured, readings with physically
//! implausible values, or with a timestamp earlier than the last accepted
//! reading, are dropped here before they reach the store or the recorder.

use thiserror::Error;

use crate::config::ValidationPolicy;
use crate::reading::{Field, Reading};

/// Why a reading was rejected
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("{field} = {value} is outside [{min}, {max}]")]
    OutOfRange {
        field: Field,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("time went backwards: {time_ms}ms after {previous_ms}ms")]
    TimeRegression { time_ms: u64, previous_ms: u64 },
}

/// Inclusive bounds per channel; channels not listed are unchecked
const LIMITS: &[(Field, f64, f64)] = &[
    (Field::Speed, 0.0, f64::MAX),
    (Field::Rpm, 0.0, f64::MAX),
    (Field::Throttle, 0.0, 100.0),
    (Field::GpsLat, -90.0, 90.0),
    (Field::GpsLon, -180.0, 180.0),
];

/// Stateful validator for one acquisition session
#[derive(Debug, Clone)]
pub struct RangeValidator {
    policy: ValidationPolicy,
    last_time_ms: Option<u64>,
}

impl RangeValidator {
    pub fn new(policy: ValidationPolicy) -> Self {
        Self {
            policy,
            last_time_ms: None,
        }
    }

    pub fn policy(&self) -> ValidationPolicy {
        self.policy
    }

    /// Check a reading; accepted readings advance the time watermark
    pub fn check(&mut self, reading: &Reading) -> Result<(), ValidationError> {
        if self.policy == ValidationPolicy::Disabled {
            return Ok(());
        }

        if let Some(previous_ms) = self.last_time_ms {
            if reading.time_ms() < previous_ms {
                return Err(ValidationError::TimeRegression {
                    time_ms: reading.time_ms(),
                    previous_ms,
                });
            }
        }

        for &(field, min, max) in LIMITS {
            if let Some(value) = reading.get(field) {
                if !(min..=max).contains(&value) {
                    return Err(ValidationError::OutOfRange {
                        field,
                        value,
                        min,
                        max,
                    });
                }
            }
        }

        self.last_time_ms = Some(reading.time_ms());
        Ok(())
    }

    /// Forget the time watermark, e.g. when a new session starts
    pub fn reset(&mut self) {
        self.last_time_ms = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::CHANNEL_COUNT;

    #[test]
    fn test_disabled_accepts_everything() {
        let mut validator = RangeValidator::new(ValidationPolicy::Disabled);
        assert!(validator.check(&Reading::legacy(100, -5.0, -1, 500.0, 0.0)).is_ok());
        assert!(validator.check(&Reading::legacy(50, 0.0, 0, 0.0, 0.0)).is_ok());
    }

    #[test]
    fn test_rejects_out_of_range() {
        let mut validator = RangeValidator::new(ValidationPolicy::Reject);
        let err = validator
            .check(&Reading::legacy(100, -5.0, 1000, 10.0, 30.0))
            .unwrap_err();
        assert!(matches!(err, ValidationError::OutOfRange { field: Field::Speed, .. }));

        let mut values = [0.0; CHANNEL_COUNT];
        values[Field::GpsLat.index()] = 123.0;
        assert!(validator.check(&Reading::extended(100, values)).is_err());
    }

    #[test]
    fn test_rejects_time_regression() {
        let mut validator = RangeValidator::new(ValidationPolicy::Reject);
        validator.check(&Reading::legacy(200, 1.0, 1000, 10.0, 30.0)).unwrap();
        validator.check(&Reading::legacy(200, 1.0, 1000, 10.0, 30.0)).unwrap();
        assert_eq!(
            validator.check(&Reading::legacy(100, 1.0, 1000, 10.0, 30.0)),
            Err(ValidationError::TimeRegression {
                time_ms: 100,
                previous_ms: 200
            })
        );

        validator.reset();
        assert!(validator.check(&Reading::legacy(100, 1.0, 1000, 10.0, 30.0)).is_ok());
    }

    #[test]
    fn test_rejected_reading_does_not_move_watermark() {
        let mut validator = RangeValidator::new(ValidationPolicy::Reject);
        assert!(validator.check(&Reading::legacy(500, -1.0, 0, 0.0, 0.0)).is_err());
        assert!(validator.check(&Reading::legacy(100, 1.0, 0, 0.0, 0.0)).is_ok());
    }
}
