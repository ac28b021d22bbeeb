//! Traffic-shifting policy for the function alias.
//!
//! Strategies map onto the predefined CodeDeploy Lambda configurations.
//! The default is an immediate all-at-once cutover without rollback.

use serde::{Deserialize, Serialize};

use crate::error::DeclarationError;

const CANARY_INTERVALS: &[u32] = &[5, 10, 15, 30];
const LINEAR_INTERVALS: &[u32] = &[1, 2, 3, 10];

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeploymentStrategy {
    #[default]
    AllAtOnce,
    /// Shift 10% first, the rest after `minutes`.
    #[serde(rename = "canary_10_percent")]
    Canary10Percent { minutes: u32 },
    /// Shift 10% every `minutes` until complete.
    #[serde(rename = "linear_10_percent")]
    Linear10Percent { minutes: u32 },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RollbackPolicy {
    pub on_deployment_failure: bool,
    pub on_alarm: bool,
    pub alarms: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DeploymentPreference {
    pub strategy: DeploymentStrategy,
    pub rollback: RollbackPolicy,
}

impl DeploymentStrategy {
    pub fn config_name(self) -> Result<String, DeclarationError> {
        match self {
            Self::AllAtOnce => Ok("CodeDeployDefault.LambdaAllAtOnce".to_string()),
            Self::Canary10Percent { minutes } => {
                check_interval("canary", minutes, CANARY_INTERVALS)?;
                Ok(format!("CodeDeployDefault.LambdaCanary10Percent{minutes}Minutes"))
            }
            Self::Linear10Percent { minutes } => {
                check_interval("linear", minutes, LINEAR_INTERVALS)?;
                let unit = if minutes == 1 { "Minute" } else { "Minutes" };
                Ok(format!(
                    "CodeDeployDefault.LambdaLinear10PercentEvery{minutes}{unit}"
                ))
            }
        }
    }
}

fn check_interval(kind: &str, minutes: u32, allowed: &[u32]) -> Result<(), DeclarationError> {
    if allowed.contains(&minutes) {
        Ok(())
    } else {
        Err(DeclarationError::config(format!(
            "{kind} deployments support intervals of {allowed:?} minutes, got {minutes}"
        )))
    }
}

impl RollbackPolicy {
    pub fn is_enabled(&self) -> bool {
        self.on_deployment_failure || self.on_alarm
    }

    pub fn events(&self) -> Vec<&'static str> {
        let mut events = Vec::new();
        if self.on_deployment_failure {
            events.push("DEPLOYMENT_FAILURE");
        }
        if self.on_alarm {
            events.push("DEPLOYMENT_STOP_ON_ALARM");
        }
        events
    }
}

impl DeploymentPreference {
    pub fn validate(&self) -> Result<(), DeclarationError> {
        self.strategy.config_name()?;
        if self.rollback.on_alarm && self.rollback.alarms.is_empty() {
            return Err(DeclarationError::config(
                "rollback on alarm requires at least one alarm name",
            ));
        }
        if self.rollback.alarms.iter().any(|name| name.trim().is_empty()) {
            return Err(DeclarationError::config("alarm names must be non-empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_all_at_once_without_rollback() {
        let preference = DeploymentPreference::default();
        assert_eq!(
            preference.strategy.config_name().expect("valid strategy"),
            "CodeDeployDefault.LambdaAllAtOnce"
        );
        assert!(!preference.rollback.is_enabled());
        assert!(preference.rollback.events().is_empty());
    }

    #[test]
    fn maps_linear_and_canary_configurations() {
        assert_eq!(
            DeploymentStrategy::Linear10Percent { minutes: 1 }
                .config_name()
                .expect("valid strategy"),
            "CodeDeployDefault.LambdaLinear10PercentEvery1Minute"
        );
        assert_eq!(
            DeploymentStrategy::Linear10Percent { minutes: 10 }
                .config_name()
                .expect("valid strategy"),
            "CodeDeployDefault.LambdaLinear10PercentEvery10Minutes"
        );
        assert_eq!(
            DeploymentStrategy::Canary10Percent { minutes: 15 }
                .config_name()
                .expect("valid strategy"),
            "CodeDeployDefault.LambdaCanary10Percent15Minutes"
        );
    }

    #[test]
    fn rejects_unsupported_interval() {
        let error = DeploymentStrategy::Canary10Percent { minutes: 7 }
            .config_name()
            .expect_err("interval should be rejected");
        assert!(error.to_string().contains("got 7"));
    }

    #[test]
    fn alarm_rollback_needs_alarms() {
        let preference = DeploymentPreference {
            strategy: DeploymentStrategy::AllAtOnce,
            rollback: RollbackPolicy {
                on_deployment_failure: false,
                on_alarm: true,
                alarms: Vec::new(),
            },
        };
        assert!(preference.validate().is_err());
    }
}
