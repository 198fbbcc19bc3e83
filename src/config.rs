//! Simulator configuration.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::narration::DEFAULT_LOG_CAPACITY;
use crate::plan::{Pattern, WritePlan};
use crate::status::Mitigations;

/// Longest accepted delay between staged phases.
pub const MAX_STAGE_DELAY_MS: u64 = 60_000;

/// Settings for a simulation session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Delay between staged `Check`/`Return`/`Done` steps. Zero is allowed.
    pub stage_delay_ms: u64,
    /// Narration entries kept, between 1 and [`DEFAULT_LOG_CAPACITY`].
    pub log_capacity: usize,
    /// Upper bound on plan length accepted by `set_plan`.
    pub max_plan_length: usize,
    /// Seed for canary bytes and the random pattern. `None` uses OS entropy.
    pub seed: Option<u64>,
    /// Protection flags at session start.
    pub mitigations: Mitigations,
    /// Plan at session start.
    pub plan: WritePlan,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            stage_delay_ms: 650,
            log_capacity: DEFAULT_LOG_CAPACITY,
            max_plan_length: 4096,
            seed: None,
            mitigations: Mitigations::none(),
            plan: WritePlan::build(Pattern::FixedByte, 24),
        }
    }
}

impl SimConfig {
    /// Validate the config.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.log_capacity == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "log_capacity must be > 0".to_string(),
            });
        }
        if self.log_capacity > DEFAULT_LOG_CAPACITY {
            return Err(ValidationError::InvalidConfig {
                reason: format!("log_capacity must be <= {DEFAULT_LOG_CAPACITY}"),
            });
        }
        if self.max_plan_length == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "max_plan_length must be > 0".to_string(),
            });
        }
        if self.stage_delay_ms > MAX_STAGE_DELAY_MS {
            return Err(ValidationError::InvalidConfig {
                reason: format!("stage_delay_ms must be <= {MAX_STAGE_DELAY_MS}"),
            });
        }
        if self.plan.length > self.max_plan_length {
            return Err(ValidationError::PlanTooLong {
                length: self.plan.length,
                max_length: self.max_plan_length,
            });
        }
        Ok(())
    }

    /// Parses a JSON document and validates it. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ValidationError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ValidationError::MalformedConfig {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Same config with a fixed RNG seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Same config with a different stage delay.
    #[must_use]
    pub fn with_stage_delay_ms(mut self, delay_ms: u64) -> Self {
        self.stage_delay_ms = delay_ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default_is_valid() {
        SimConfig::default().validate().unwrap();
    }

    #[test]
    fn config_rejects_bad_limits() {
        let mut c = SimConfig::default();
        c.log_capacity = 0;
        assert!(c.validate().is_err());

        let mut c = SimConfig::default();
        c.log_capacity = DEFAULT_LOG_CAPACITY + 1;
        assert!(c.validate().is_err());

        let mut c = SimConfig::default();
        c.max_plan_length = 0;
        assert!(c.validate().is_err());

        let mut c = SimConfig::default();
        c.stage_delay_ms = MAX_STAGE_DELAY_MS + 1;
        assert!(c.validate().is_err());

        let mut c = SimConfig::default();
        c.plan.length = c.max_plan_length + 1;
        assert!(matches!(c.validate(), Err(ValidationError::PlanTooLong { .. })));
    }

    #[test]
    fn config_from_json_fills_defaults() {
        let c = SimConfig::from_json_str(
            r#"{
                "seed": 42,
                "stage_delay_ms": 0,
                "mitigations": { "canary_check_enabled": true },
                "plan": { "pattern": { "type": "repeating_sequence" }, "length": 40 }
            }"#,
        )
        .unwrap();
        assert_eq!(c.seed, Some(42));
        assert_eq!(c.stage_delay_ms, 0);
        assert_eq!(c.log_capacity, DEFAULT_LOG_CAPACITY);
        assert!(c.mitigations.canary_check_enabled);
        assert_eq!(c.plan, WritePlan::build(Pattern::RepeatingSequence, 40));
    }

    #[test]
    fn config_from_json_rejects_garbage() {
        assert!(matches!(
            SimConfig::from_json_str("{ not json"),
            Err(ValidationError::MalformedConfig { .. })
        ));
        assert!(matches!(
            SimConfig::from_json_str(r#"{ "log_capacity": 0 }"#),
            Err(ValidationError::InvalidConfig { .. })
        ));
        assert!(matches!(
            SimConfig::from_json_str(r#"{ "log_capacity": 12 }"#),
            Err(ValidationError::InvalidConfig { .. })
        ));
    }
}
