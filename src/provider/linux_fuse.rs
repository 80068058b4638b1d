//! Native Linux FUSE provider.
//!
//! Unlike the macOS and WinFsp providers, the native library here is the
//! `fuser` crate's own linked libfuse binding, there is no separate
//! dynamic library to probe for on disk, so runtime support collapses to
//! "are we running on Linux".

use super::{Capability, Provider};

fn os_match() -> bool {
    cfg!(target_os = "linux")
}

fn runtime_supported() -> bool {
    true
}

const CAPABILITIES: &[Capability] = &[
    Capability::MountFlags,
    Capability::MountWithinExistingParent,
    Capability::MountPointEmptyDir,
    Capability::ReadOnly,
    Capability::UnmountForced,
];

pub(super) fn provider() -> Provider {
    Provider {
        name: "libfuse",
        priority: 100,
        capabilities: CAPABILITIES,
        os_match,
        runtime_supported,
        default_flags: &[],
    }
}
