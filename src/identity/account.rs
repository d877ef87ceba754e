//! Resolved user accounts.

use std::path::{Path, PathBuf};

use super::IdentityError;

/// A resolved OS account: numeric ids plus the name and home directory
/// injected into a child's environment.
///
/// An `Identity` is a plain value. Changing it goes through
/// [`Identity::set_username`], which either replaces every field or none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    uid: u32,
    gid: u32,
    username: String,
    home_dir: PathBuf,
}

impl Identity {
    /// Build an identity from already-known ids, skipping the account lookup.
    #[must_use]
    pub fn from_parts(
        uid: u32,
        gid: u32,
        username: impl Into<String>,
        home_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            uid,
            gid,
            username: username.into(),
            home_dir: home_dir.into(),
        }
    }

    /// Look up a named account.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::NotFound` if no such account exists, or
    /// `IdentityError::Lookup` if the account database cannot be read.
    #[cfg(unix)]
    pub fn resolve(username: &str) -> Result<Self, IdentityError> {
        let user = nix::unistd::User::from_name(username)
            .map_err(|e| IdentityError::Lookup {
                name: username.to_string(),
                source: e.into(),
            })?
            .ok_or_else(|| IdentityError::NotFound(username.to_string()))?;
        Ok(Self::from_user(user))
    }

    /// Look up a named account.
    ///
    /// # Errors
    ///
    /// Always returns `IdentityError::Unsupported` on this platform.
    #[cfg(not(unix))]
    pub fn resolve(_username: &str) -> Result<Self, IdentityError> {
        Err(IdentityError::Unsupported)
    }

    /// Capture the account this process is running as (its real uid).
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::UnknownUid` if the uid has no account entry.
    #[cfg(unix)]
    pub fn current() -> Result<Self, IdentityError> {
        let uid = nix::unistd::Uid::current();
        let user = nix::unistd::User::from_uid(uid)
            .map_err(|e| IdentityError::Lookup {
                name: uid.to_string(),
                source: e.into(),
            })?
            .ok_or(IdentityError::UnknownUid(uid.as_raw()))?;
        Ok(Self::from_user(user))
    }

    /// Capture the account this process is running as.
    ///
    /// # Errors
    ///
    /// Always returns `IdentityError::Unsupported` on this platform.
    #[cfg(not(unix))]
    pub fn current() -> Result<Self, IdentityError> {
        Err(IdentityError::Unsupported)
    }

    #[cfg(unix)]
    fn from_user(user: nix::unistd::User) -> Self {
        Self {
            uid: user.uid.as_raw(),
            gid: user.gid.as_raw(),
            username: user.name,
            home_dir: user.dir,
        }
    }

    /// Re-resolve this identity to another account.
    ///
    /// On failure `self` is left untouched.
    ///
    /// # Errors
    ///
    /// Returns the lookup error from [`Identity::resolve`].
    pub fn set_username(&mut self, username: &str) -> Result<(), IdentityError> {
        *self = Self::resolve(username)?;
        Ok(())
    }

    #[must_use]
    pub fn uid(&self) -> u32 {
        self.uid
    }

    #[must_use]
    pub fn gid(&self) -> u32 {
        self.gid
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    #[must_use]
    pub fn home_dir(&self) -> &Path {
        &self.home_dir
    }

    /// The `USER`/`HOME` pairs a child launched as this identity receives.
    #[must_use]
    pub fn env_vars(&self) -> [(&'static str, String); 2] {
        [
            ("USER", self.username.clone()),
            ("HOME", self.home_dir.to_string_lossy().into_owned()),
        ]
    }

    /// Whether both ids are non-root, i.e. launching as this identity
    /// actually drops privileges.
    #[must_use]
    pub fn is_unprivileged(&self) -> bool {
        self.uid > 0 && self.gid > 0
    }
}

/// Check that the calling process runs with an effective uid of 0.
///
/// Meant as a precondition for call sites that launch children under
/// other accounts; the supervisor itself does not call it.
///
/// # Errors
///
/// Returns `IdentityError::PermissionDenied` when not running as root.
#[cfg(unix)]
pub fn require_root() -> Result<(), IdentityError> {
    let euid = nix::unistd::Uid::effective();
    if euid.is_root() {
        Ok(())
    } else {
        Err(IdentityError::PermissionDenied(format!(
            "must run as root (effective uid is {euid})"
        )))
    }
}

/// Check that the calling process runs as the superuser.
///
/// # Errors
///
/// Always returns `IdentityError::Unsupported` on this platform.
#[cfg(not(unix))]
pub fn require_root() -> Result<(), IdentityError> {
    Err(IdentityError::Unsupported)
}
