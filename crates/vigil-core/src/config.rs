//! Engine configuration surface.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::rule::Channel;

/// What counts as a successful action when some channels fail.
///
/// The policy is an explicit configuration choice; nothing in the engine
/// assumes one or the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuccessPolicy {
    /// At least one channel attempt delivered.
    AnyChannel,
    /// Every channel attempt delivered.
    AllChannels,
}

impl SuccessPolicy {
    /// Apply the policy to a set of attempts.
    pub fn is_successful(&self, delivered: usize, attempted: usize) -> bool {
        if attempted == 0 {
            return false;
        }
        match self {
            Self::AnyChannel => delivered > 0,
            Self::AllChannels => delivered == attempted,
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Overdue-scan interval in seconds.
    #[serde(default = "default_scan_interval")]
    pub scan_interval_seconds: u64,
    /// Default re-arm window: the same rule may not fire again for the same
    /// incident within this window unless the rule declares its own repeat
    /// interval.
    #[serde(default = "default_rearm_window")]
    pub rearm_window_seconds: u64,
    /// Per-channel send timeout in seconds.
    #[serde(default = "default_channel_timeout")]
    pub channel_timeout_seconds: u64,
    /// Aggregate success policy for actions.
    #[serde(default = "default_success_policy")]
    pub success_policy: SuccessPolicy,
    /// Status tokens considered "open" for scanning and deferred execution.
    #[serde(default = "default_open_statuses")]
    pub open_statuses: BTreeSet<String>,
    /// Role groups notified on manual escalation.
    #[serde(default = "default_manual_roles")]
    pub manual_recipient_roles: Vec<String>,
    /// Channels used for manual escalation notifications.
    #[serde(default = "default_manual_channels")]
    pub manual_channels: Vec<Channel>,
    /// Template used for manual escalation notifications.
    #[serde(default = "default_manual_template")]
    pub manual_template_id: String,
    /// Rule snapshot refresh interval in seconds.
    #[serde(default = "default_cache_refresh")]
    pub rule_cache_refresh_seconds: u64,
    /// Deferred-queue poll interval in seconds.
    #[serde(default = "default_deferred_poll")]
    pub deferred_poll_seconds: u64,
    /// History write retry attempts before surfacing an operational alert.
    #[serde(default = "default_history_retries")]
    pub history_write_retries: u32,
    /// Base backoff between history write retries, in milliseconds.
    #[serde(default = "default_history_backoff")]
    pub history_retry_backoff_ms: u64,
}

fn default_scan_interval() -> u64 {
    300 // 5 minutes
}

fn default_rearm_window() -> u64 {
    86_400 // 24 hours
}

fn default_channel_timeout() -> u64 {
    30
}

fn default_success_policy() -> SuccessPolicy {
    SuccessPolicy::AnyChannel
}

fn default_open_statuses() -> BTreeSet<String> {
    ["open", "investigating"].iter().map(|s| s.to_string()).collect()
}

fn default_manual_roles() -> Vec<String> {
    vec!["safety_manager".to_string(), "security_manager".to_string()]
}

fn default_manual_channels() -> Vec<Channel> {
    vec![Channel::Email, Channel::InApp]
}

fn default_manual_template() -> String {
    "manual_escalation".to_string()
}

fn default_cache_refresh() -> u64 {
    60
}

fn default_deferred_poll() -> u64 {
    15
}

fn default_history_retries() -> u32 {
    3
}

fn default_history_backoff() -> u64 {
    200
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scan_interval_seconds: default_scan_interval(),
            rearm_window_seconds: default_rearm_window(),
            channel_timeout_seconds: default_channel_timeout(),
            success_policy: default_success_policy(),
            open_statuses: default_open_statuses(),
            manual_recipient_roles: default_manual_roles(),
            manual_channels: default_manual_channels(),
            manual_template_id: default_manual_template(),
            rule_cache_refresh_seconds: default_cache_refresh(),
            deferred_poll_seconds: default_deferred_poll(),
            history_write_retries: default_history_retries(),
            history_retry_backoff_ms: default_history_backoff(),
        }
    }
}

impl EngineConfig {
    /// Set the success policy.
    pub fn with_success_policy(mut self, policy: SuccessPolicy) -> Self {
        self.success_policy = policy;
        self
    }

    /// Set the scan interval.
    pub fn with_scan_interval(mut self, seconds: u64) -> Self {
        self.scan_interval_seconds = seconds;
        self
    }

    /// Set the re-arm window.
    pub fn with_rearm_window(mut self, seconds: u64) -> Self {
        self.rearm_window_seconds = seconds;
        self
    }

    /// Set the open-status token set.
    pub fn with_open_statuses<I, S>(mut self, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.open_statuses = statuses.into_iter().map(Into::into).collect();
        self
    }

    /// Set the manual escalation recipient roles.
    pub fn with_manual_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.manual_recipient_roles = roles.into_iter().map(Into::into).collect();
        self
    }

    /// Whether a status token counts as open.
    pub fn is_open(&self, status: &str) -> bool {
        self.open_statuses.contains(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_policy_any() {
        let policy = SuccessPolicy::AnyChannel;
        assert!(policy.is_successful(1, 2));
        assert!(policy.is_successful(2, 2));
        assert!(!policy.is_successful(0, 2));
        assert!(!policy.is_successful(0, 0));
    }

    #[test]
    fn test_success_policy_all() {
        let policy = SuccessPolicy::AllChannels;
        assert!(!policy.is_successful(1, 2));
        assert!(policy.is_successful(2, 2));
        assert!(!policy.is_successful(0, 0));
    }

    #[test]
    fn test_config_defaults_from_empty_json() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.scan_interval_seconds, 300);
        assert_eq!(config.rearm_window_seconds, 86_400);
        assert_eq!(config.success_policy, SuccessPolicy::AnyChannel);
        assert!(config.is_open("open"));
        assert!(!config.is_open("closed"));
    }

    #[test]
    fn test_config_builder() {
        let config = EngineConfig::default()
            .with_success_policy(SuccessPolicy::AllChannels)
            .with_rearm_window(3600)
            .with_open_statuses(["open"]);

        assert_eq!(config.success_policy, SuccessPolicy::AllChannels);
        assert_eq!(config.rearm_window_seconds, 3600);
        assert!(!config.is_open("investigating"));
    }
}
