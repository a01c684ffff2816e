//! Weight profiles
//!
//! A profile says which metrics make up each layer's performance index and
//! how much each one counts, plus the `alpha` blend between mean LPI and the
//! degradation coefficient in the composite score.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ComputeError;
use crate::types::{MetricName, LAYER_COUNT};

/// Allowed deviation of a layer's weight sum from 1.0
pub const WEIGHT_SUM_TOLERANCE: f64 = 0.01;

/// Default blend between mean LPI and degradation coefficient
pub const DEFAULT_ALPHA: f64 = 0.7;

/// Per-layer metric weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightProfile {
    pub id: String,
    pub name: String,
    /// Weight of mean LPI against DC in the composite score
    pub alpha: f64,
    pub layers: [BTreeMap<MetricName, f64>; LAYER_COUNT],
}

impl Default for WeightProfile {
    fn default() -> Self {
        let layer = |pairs: &[(MetricName, f64)]| pairs.iter().copied().collect::<BTreeMap<_, _>>();
        Self {
            id: "default".to_string(),
            name: "Balanced".to_string(),
            alpha: DEFAULT_ALPHA,
            layers: [
                layer(&[
                    (MetricName::ReactionTimeMean, 0.6),
                    (MetricName::ReactionTimeStd, 0.4),
                ]),
                layer(&[
                    (MetricName::TrackingErrorMean, 0.5),
                    (MetricName::JerkMean, 0.2),
                    (MetricName::OvershootRate, 0.3),
                ]),
                layer(&[
                    (MetricName::TrackingErrorMean, 0.3),
                    (MetricName::AudioAccuracy, 0.4),
                    (MetricName::PrpMean, 0.2),
                    (MetricName::AudioFalsePositives, 0.1),
                ]),
                layer(&[
                    (MetricName::TrackingErrorMean, 0.2),
                    (MetricName::AudioAccuracy, 0.2),
                    (MetricName::CooldownDelayMean, 0.2),
                    (MetricName::PeripheralRtMean, 0.2),
                    (MetricName::PeripheralMissRate, 0.2),
                ]),
            ],
        }
    }
}

impl WeightProfile {
    /// Parse and validate a profile
    pub fn from_json(json: &str) -> Result<Self, ComputeError> {
        let profile: WeightProfile = serde_json::from_str(json)?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn to_json(&self) -> Result<String, ComputeError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject profiles the scoring engine must not use
    pub fn validate(&self) -> Result<(), ComputeError> {
        let fail = |msg: String| {
            log::warn!("weight profile {:?} rejected: {msg}", self.id);
            Err(ComputeError::Configuration(msg))
        };

        if !(0.0..=1.0).contains(&self.alpha) {
            return fail(format!("alpha {} outside [0, 1]", self.alpha));
        }
        for (layer, weights) in self.layers.iter().enumerate() {
            let layer = layer as u8;
            if weights.is_empty() {
                return fail(format!("layer {layer} has no metrics"));
            }
            for (metric, weight) in weights {
                if !metric.applies_to(layer) {
                    return fail(format!(
                        "metric {} does not apply to layer {layer}",
                        metric.as_str()
                    ));
                }
                if !weight.is_finite() || *weight < 0.0 {
                    return fail(format!(
                        "metric {} in layer {layer} has invalid weight {weight}",
                        metric.as_str()
                    ));
                }
            }
            let sum: f64 = weights.values().sum();
            if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
                return fail(format!("layer {layer} weights sum to {sum:.3}, expected 1.0"));
            }
        }
        Ok(())
    }

    /// Weights for a layer
    pub fn layer(&self, layer: u8) -> &BTreeMap<MetricName, f64> {
        crate::types::assert_layer(layer);
        &self.layers[layer as usize]
    }
}
