use serde::{Deserialize, Serialize};

use crate::config::OrchConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationLevel {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub level: ValidationLevel,
    pub code: &'static str,
    pub message: String,
}

pub trait Validate {
    fn validate(&self) -> Vec<ValidationIssue>;
}

impl Validate for OrchConfig {
    fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if self.server.bind.trim().is_empty() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "server.bind.empty",
                message: "bind address must not be empty".to_string(),
            });
        }

        let url = self.server.public_url.trim();
        if !url.starts_with("ws://") && !url.starts_with("wss://") {
            issues.push(ValidationIssue {
                level: ValidationLevel::Warning,
                code: "server.public_url.scheme",
                message: format!("public_url '{url}' is not a ws:// or wss:// endpoint"),
            });
        }

        if self.workers.command.trim().is_empty() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "workers.command.empty",
                message: "worker command must not be empty".to_string(),
            });
        }

        if self.workers.heartbeat_timeout_secs == 0 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "workers.heartbeat_timeout.zero",
                message: "heartbeat timeout cannot be 0".to_string(),
            });
        }

        let orchestrator = &self.orchestrator;
        if orchestrator.max_iterations_per_subtask == 0 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "orchestrator.max_iterations.zero",
                message: "max_iterations_per_subtask must be greater than zero".to_string(),
            });
        }

        if orchestrator.stuck_prompt_interval > orchestrator.max_iterations_per_subtask {
            issues.push(ValidationIssue {
                level: ValidationLevel::Warning,
                code: "orchestrator.stuck_interval.unreachable",
                message: format!(
                    "stuck_prompt_interval {} exceeds max_iterations_per_subtask {}; nudges never fire",
                    orchestrator.stuck_prompt_interval, orchestrator.max_iterations_per_subtask
                ),
            });
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_clean() {
        assert!(OrchConfig::default().validate().is_empty());
    }

    #[test]
    fn reports_errors_for_unusable_values() {
        let mut config = OrchConfig::default();
        config.server.bind = "  ".to_string();
        config.workers.command = String::new();
        config.workers.heartbeat_timeout_secs = 0;
        config.orchestrator.max_iterations_per_subtask = 0;

        let codes = config
            .validate()
            .into_iter()
            .filter(|issue| issue.level == ValidationLevel::Error)
            .map(|issue| issue.code)
            .collect::<Vec<_>>();
        assert_eq!(
            codes,
            vec![
                "server.bind.empty",
                "workers.command.empty",
                "workers.heartbeat_timeout.zero",
                "orchestrator.max_iterations.zero",
            ]
        );
    }

    #[test]
    fn warns_on_unreachable_stuck_interval_and_http_url() {
        let mut config = OrchConfig::default();
        config.orchestrator.max_iterations_per_subtask = 4;
        config.orchestrator.stuck_prompt_interval = 10;
        config.server.public_url = "http://localhost/ws".to_string();

        let issues = config.validate();
        assert!(issues.iter().all(|issue| issue.level == ValidationLevel::Warning));
        assert!(issues
            .iter()
            .any(|issue| issue.code == "orchestrator.stuck_interval.unreachable"));
        assert!(issues
            .iter()
            .any(|issue| issue.code == "server.public_url.scheme"));
    }
}
