//! Supervisor configuration.
//!
//! A [`SupervisorBuilder`] collects settings and freezes them into an
//! immutable [`SupervisorOptions`] shared by the supervisor and its
//! background tasks.

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::identity::Identity;

use super::{default_job_control, Console, JobControl, Supervisor};

/// Default polling period of the stopped-process monitor.
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(3);

/// How output on stderr affects [`Supervisor::get_output`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StderrPolicy {
    /// Any stderr output makes the run an error.
    #[default]
    Fail,
    /// Stderr is captured but never turns a run into an error.
    Ignore,
}

/// Raw uid/gid to switch to before exec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credential {
    pub uid: u32,
    pub gid: u32,
}

/// Low-level launch attributes. When set, they replace the credential the
/// supervisor would derive from its identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaunchAttributes {
    pub credential: Option<Credential>,
    /// Place the child in this process group (`0` creates a new one).
    pub process_group: Option<i32>,
}

/// Frozen supervisor settings.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub(crate) identity: Option<Identity>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) working_dir: Option<PathBuf>,
    pub(crate) environment: Option<Vec<String>>,
    pub(crate) debug: bool,
    pub(crate) suppress_group_inheritance: bool,
    pub(crate) launch: Option<LaunchAttributes>,
    pub(crate) stderr_policy: StderrPolicy,
    pub(crate) monitor_interval: Duration,
    pub(crate) job_control: Arc<dyn JobControl>,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            identity: None,
            timeout: None,
            working_dir: None,
            environment: None,
            debug: false,
            suppress_group_inheritance: false,
            launch: None,
            stderr_policy: StderrPolicy::default(),
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
            job_control: default_job_control(),
        }
    }
}

impl SupervisorOptions {
    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    #[must_use]
    pub fn working_dir(&self) -> Option<&PathBuf> {
        self.working_dir.as_ref()
    }

    #[must_use]
    pub fn environment(&self) -> Option<&[String]> {
        self.environment.as_deref()
    }

    #[must_use]
    pub fn debug(&self) -> bool {
        self.debug
    }

    #[must_use]
    pub fn stderr_policy(&self) -> StderrPolicy {
        self.stderr_policy
    }

    #[must_use]
    pub fn monitor_interval(&self) -> Duration {
        self.monitor_interval
    }

    /// The `KEY=VALUE` pairs the child starts with, or `None` to inherit.
    ///
    /// An explicit environment is used verbatim. Otherwise, with an
    /// identity set, the inherited environment gains `USER` and `HOME`.
    /// Inherited values are passed through as raw OS strings, so entries
    /// that are not valid UTF-8 survive untouched.
    #[must_use]
    pub fn child_environment(&self) -> Option<Vec<(OsString, OsString)>> {
        if let Some(env) = &self.environment {
            return Some(
                env.iter()
                    .filter_map(|entry| match entry.split_once('=') {
                        Some((key, value)) if !key.is_empty() => {
                            Some((OsString::from(key), OsString::from(value)))
                        }
                        _ => {
                            tracing::warn!(entry = %entry, "Ignoring malformed environment entry");
                            None
                        }
                    })
                    .collect(),
            );
        }

        self.identity.as_ref().map(|identity| {
            let mut vars: Vec<(OsString, OsString)> = std::env::vars_os().collect();
            vars.push(("USER".into(), identity.username().into()));
            vars.push(("HOME".into(), identity.home_dir().as_os_str().to_owned()));
            vars
        })
    }

    /// The credential to launch with, if any.
    ///
    /// Explicit launch attributes win. An identity only yields one when it
    /// is unprivileged and differs from the ids this process already has.
    #[must_use]
    pub fn credential(&self) -> Option<Credential> {
        if let Some(launch) = &self.launch {
            return launch.credential;
        }

        let identity = self.identity.as_ref().filter(|i| i.is_unprivileged())?;
        let credential = Credential {
            uid: identity.uid(),
            gid: identity.gid(),
        };
        if Some(credential) == current_credential() {
            None
        } else {
            Some(credential)
        }
    }

    #[must_use]
    pub fn process_group(&self) -> Option<i32> {
        self.launch.and_then(|launch| launch.process_group)
    }
}

#[cfg(unix)]
fn current_credential() -> Option<Credential> {
    Some(Credential {
        uid: nix::unistd::Uid::effective().as_raw(),
        gid: nix::unistd::Gid::effective().as_raw(),
    })
}

#[cfg(not(unix))]
fn current_credential() -> Option<Credential> {
    None
}

/// Builder for a [`Supervisor`].
#[derive(Debug, Default)]
pub struct SupervisorBuilder {
    options: SupervisorOptions,
    console: Option<Console>,
}

impl SupervisorBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Launch children as this account.
    #[must_use]
    pub fn identity(mut self, identity: Identity) -> Self {
        self.options.identity = Some(identity);
        self
    }

    /// Kill the child if it has not exited this long after `start`.
    /// A zero duration disables the deadline.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.options.working_dir = Some(dir.into());
        self
    }

    /// Replace the child's environment with these `KEY=VALUE` entries.
    #[must_use]
    pub fn environment<I, S>(mut self, env: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.environment = Some(env.into_iter().map(Into::into).collect());
        self
    }

    /// Echo captured output and raise diagnostics to visible log levels.
    #[must_use]
    pub fn debug(mut self, debug: bool) -> Self {
        self.options.debug = debug;
        self
    }

    /// Keep the supervisor's supplementary groups when switching credentials
    /// instead of clearing them.
    #[must_use]
    pub fn suppress_group_inheritance(mut self, suppress: bool) -> Self {
        self.options.suppress_group_inheritance = suppress;
        self
    }

    #[must_use]
    pub fn launch_attributes(mut self, launch: LaunchAttributes) -> Self {
        self.options.launch = Some(launch);
        self
    }

    #[must_use]
    pub fn stderr_policy(mut self, policy: StderrPolicy) -> Self {
        self.options.stderr_policy = policy;
        self
    }

    #[must_use]
    pub fn monitor_interval(mut self, interval: Duration) -> Self {
        self.options.monitor_interval = interval;
        self
    }

    #[must_use]
    pub fn job_control(mut self, job_control: Arc<dyn JobControl>) -> Self {
        self.options.job_control = job_control;
        self
    }

    /// Where `provide_input` prompts and reads answers.
    #[must_use]
    pub fn console(mut self, console: Console) -> Self {
        self.console = Some(console);
        self
    }

    #[must_use]
    pub fn options(&self) -> &SupervisorOptions {
        &self.options
    }

    #[must_use]
    pub fn build(self) -> Supervisor {
        Supervisor::from_parts(
            Arc::new(self.options),
            self.console.unwrap_or_default(),
        )
    }
}
