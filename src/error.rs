//! Error taxonomy (§7).
//!
//! One enum per the spec's error list, following the teacher's
//! `NexusClientError` shape: a doc comment per variant, `#[from]` at the
//! edges, and a `to_errno` mapping for the handful of variants that must
//! cross into a `fuser::Reply*`.

use thiserror::Error;

/// Errors surfaced by provider selection, mount building, and the mount
/// lifecycle controller. Propagation policy: every error here reaches the
/// caller; none are swallowed (§7).
#[derive(Debug, Error)]
pub enum AdapterError {
    /// No registered provider survived OS, runtime-support, and capability
    /// filtering (§4.3).
    #[error("no mount provider is applicable to this host and capability set")]
    NoApplicableProvider,

    /// Caller asked a builder for a capability the selected provider does
    /// not declare.
    #[error("provider {provider} does not support capability {capability:?}")]
    UnsupportedCapability {
        provider: String,
        capability: crate::provider::Capability,
    },

    /// A builder parameter was missing or malformed for the selected
    /// provider (e.g. a non-root mount point given to a drive-letter
    /// builder, or a loopback host name containing reserved characters).
    #[error("invalid mount parameter: {0}")]
    InvalidMountParameter(String),

    /// The native backend refused to mount; wraps the underlying cause.
    #[error("mount failed: {0}")]
    MountFailed(String),

    /// Graceful unmount was refused because the backend reports the
    /// adapter is still in use.
    #[error("unmount refused: mount point is in use")]
    UnmountRefused,

    /// Unmount failed for a reason other than in-use.
    #[error("unmount failed: {0}")]
    UnmountFailed(String),

    /// Releasing a mount handle from a state other than `Unmounted`.
    #[error("release called on a mount handle that was not unmounted (state: {0:?})")]
    ReleaseFromLiveState(crate::mount::MountStatus),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PartialEq for AdapterError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::NoApplicableProvider, Self::NoApplicableProvider) => true,
            (
                Self::UnsupportedCapability { provider: p1, capability: c1 },
                Self::UnsupportedCapability { provider: p2, capability: c2 },
            ) => p1 == p2 && c1 == c2,
            (Self::InvalidMountParameter(a), Self::InvalidMountParameter(b)) => a == b,
            (Self::MountFailed(a), Self::MountFailed(b)) => a == b,
            (Self::UnmountRefused, Self::UnmountRefused) => true,
            (Self::UnmountFailed(a), Self::UnmountFailed(b)) => a == b,
            (Self::ReleaseFromLiveState(a), Self::ReleaseFromLiveState(b)) => a == b,
            (Self::Io(a), Self::Io(b)) => a.kind() == b.kind(),
            _ => false,
        }
    }
}

/// Error surface for the `FilesystemOps` collaborator (§6). The core does
/// not prescribe its semantics, only that every variant maps to an errno
/// so `AdapterBridge` can reply correctly.
#[derive(Debug, Error)]
pub enum OpsError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("is a directory: {0}")]
    IsADirectory(String),

    #[error("directory not empty: {0}")]
    NotEmpty(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl OpsError {
    /// Map to a FUSE errno code, mirroring the teacher's
    /// `NexusClientError::to_errno`.
    pub fn to_errno(&self) -> i32 {
        match self {
            Self::NotFound(_) => libc::ENOENT,
            Self::AlreadyExists(_) => libc::EEXIST,
            Self::NotADirectory(_) => libc::ENOTDIR,
            Self::IsADirectory(_) => libc::EISDIR,
            Self::NotEmpty(_) => libc::ENOTEMPTY,
            Self::PermissionDenied(_) => libc::EACCES,
            Self::InvalidArgument(_) => libc::EINVAL,
            Self::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}
