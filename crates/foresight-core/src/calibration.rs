//! Calibration of the raw ensemble mean.
//!
//! LLM forecasts tend to be overconfident, so the aggregator can pass the
//! ensemble mean through a fixed correction before reporting it as the
//! calibrated probability. The default is the identity transform.

use serde::{Deserialize, Serialize};

use crate::CoreError;

/// Calibration transform applied to a probability in percent.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Calibration {
    /// No adjustment.
    #[default]
    Identity,

    /// Pull the estimate toward 50 by `factor` (0 = unchanged, 1 = always 50).
    Shrinkage { factor: f64 },

    /// Temperature scaling in log-odds space. `temperature > 1` softens
    /// toward 50, `temperature < 1` pushes toward the extremes.
    Temperature { temperature: f64 },
}

impl Calibration {
    /// Check parameters are usable.
    pub fn validate(&self) -> Result<(), CoreError> {
        match *self {
            Calibration::Identity => Ok(()),
            Calibration::Shrinkage { factor } => {
                if factor.is_finite() && (0.0..=1.0).contains(&factor) {
                    Ok(())
                } else {
                    Err(CoreError::InvalidCalibration(format!(
                        "shrinkage factor must be within [0, 1], got {}",
                        factor
                    )))
                }
            }
            Calibration::Temperature { temperature } => {
                if temperature.is_finite() && temperature > 0.0 {
                    Ok(())
                } else {
                    Err(CoreError::InvalidCalibration(format!(
                        "temperature must be positive, got {}",
                        temperature
                    )))
                }
            }
        }
    }

    /// Apply the transform. The result stays within `[0, 100]`.
    pub fn apply(&self, probability: f64) -> f64 {
        let calibrated = match *self {
            Calibration::Identity => probability,
            Calibration::Shrinkage { factor } => 50.0 + (probability - 50.0) * (1.0 - factor),
            Calibration::Temperature { temperature } => {
                // Keep away from 0 and 1 so the logit stays finite.
                let p = (probability / 100.0).clamp(1e-6, 1.0 - 1e-6);
                let logit = (p / (1.0 - p)).ln();
                100.0 / (1.0 + (-logit / temperature).exp())
            }
        };
        calibrated.clamp(0.0, 100.0)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Calibration::Identity => "identity",
            Calibration::Shrinkage { .. } => "shrinkage",
            Calibration::Temperature { .. } => "temperature",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_passthrough() {
        assert_eq!(Calibration::Identity.apply(73.0), 73.0);
    }

    #[test]
    fn test_shrinkage_toward_fifty() {
        let c = Calibration::Shrinkage { factor: 0.2 };
        assert!((c.apply(90.0) - 82.0).abs() < 1e-9);
        assert!((c.apply(10.0) - 18.0).abs() < 1e-9);
        assert_eq!(c.apply(50.0), 50.0);
    }

    #[test]
    fn test_temperature_scaling() {
        let soften = Calibration::Temperature { temperature: 2.0 };
        let p = soften.apply(90.0);
        assert!(p < 90.0 && p > 50.0);
        assert!((soften.apply(50.0) - 50.0).abs() < 1e-9);

        let sharpen = Calibration::Temperature { temperature: 0.5 };
        assert!(sharpen.apply(70.0) > 70.0);
    }

    #[test]
    fn test_validation() {
        assert!(Calibration::Shrinkage { factor: 1.5 }.validate().is_err());
        assert!(Calibration::Temperature { temperature: 0.0 }.validate().is_err());
        assert!(Calibration::Shrinkage { factor: 0.3 }.validate().is_ok());
    }

    #[test]
    fn test_serde_tagged() {
        let c: Calibration = serde_json::from_str(r#"{"method":"shrinkage","factor":0.1}"#).unwrap();
        assert_eq!(c, Calibration::Shrinkage { factor: 0.1 });
        let c: Calibration = serde_json::from_str(r#"{"method":"identity"}"#).unwrap();
        assert_eq!(c, Calibration::Identity);
    }
}
