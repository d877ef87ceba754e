//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::identity::{Identity, IdentityError};
use crate::process::{StderrPolicy, SupervisorBuilder, DEFAULT_MONITOR_INTERVAL};
use crate::retry::RetryPolicy;

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcvisorConfig {
    pub supervisor: SupervisorSettings,
    pub retry: RetrySettings,
}

/// Defaults for every supervised run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorSettings {
    /// Account to launch children as.
    pub user: Option<String>,
    /// Kill children after this many seconds.
    pub timeout_secs: Option<u64>,
    /// Working directory; the current directory when unset.
    pub work_dir: Option<PathBuf>,
    /// Replacement environment as `KEY=VALUE` entries.
    pub env: Option<Vec<String>>,
    pub debug: bool,
    /// Keep supplementary groups when switching accounts.
    pub no_set_groups: bool,
    pub stderr_policy: StderrPolicy,
    /// Period of the stopped-process monitor.
    #[serde(default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,
}

fn default_monitor_interval_ms() -> u64 {
    u64::try_from(DEFAULT_MONITOR_INTERVAL.as_millis()).unwrap_or(3000)
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            user: None,
            timeout_secs: None,
            work_dir: None,
            env: None,
            debug: false,
            no_set_groups: false,
            stderr_policy: StderrPolicy::default(),
            monitor_interval_ms: default_monitor_interval_ms(),
        }
    }
}

impl SupervisorSettings {
    /// A supervisor builder preloaded with these settings.
    ///
    /// # Errors
    ///
    /// Returns an error if `user` is set and cannot be resolved.
    pub fn builder(&self) -> Result<SupervisorBuilder, IdentityError> {
        let mut builder = SupervisorBuilder::new()
            .debug(self.debug)
            .suppress_group_inheritance(self.no_set_groups)
            .stderr_policy(self.stderr_policy)
            .monitor_interval(Duration::from_millis(self.monitor_interval_ms));

        if let Some(user) = &self.user {
            builder = builder.identity(Identity::resolve(user)?);
        }
        if let Some(secs) = self.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        if let Some(dir) = &self.work_dir {
            builder = builder.working_dir(dir);
        }
        if let Some(env) = &self.env {
            builder = builder.environment(env.iter().cloned());
        }
        Ok(builder)
    }
}

/// Backoff settings for retried runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_secs: u64,
    pub jitter_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_secs: 1,
            jitter_secs: 3,
        }
    }
}

impl RetrySettings {
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::from_secs(self.max_attempts, self.base_delay_secs, self.jitter_secs)
    }
}
