//! Identity error types.

/// Errors that can occur while resolving or checking an identity.
#[derive(thiserror::Error, Debug)]
pub enum IdentityError {
    /// No account with this name exists.
    #[error("User not found: {0}")]
    NotFound(String),

    /// No account exists for this numeric uid.
    #[error("No user with uid {0}")]
    UnknownUid(u32),

    /// The caller is not allowed to do this.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The account database lookup itself failed.
    #[error("Failed to look up user {name}: {source}")]
    Lookup {
        name: String,
        source: std::io::Error,
    },

    /// Account lookups are not available on this platform.
    #[error("User accounts are not supported on this platform")]
    Unsupported,
}
