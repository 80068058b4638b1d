//! CLI-driven mount configuration (§13, SPEC_FULL).
//!
//! Every knob a [`crate::builder::MountBuilder`] exposes has a matching
//! `clap` field here, each overridable by an environment variable so the
//! binary can run unattended under a process supervisor. There is no
//! config-file layer, the teacher's own CLI is flag/env driven only, and
//! this crate's parameter set is small enough not to need one.

use std::path::PathBuf;

use clap::Parser;

/// Mount an abstract file system at a local path.
#[derive(Debug, Parser)]
#[command(name = "nio-fuse-adapter", version, about)]
pub struct MountConfig {
    /// Local directory the file system is exposed at.
    #[arg(long, env = "NIO_MOUNT_POINT")]
    pub mount_point: PathBuf,

    /// Backing directory `LocalOps` reads and writes through.
    #[arg(long, env = "NIO_BACKING_ROOT")]
    pub backing_root: PathBuf,

    /// Mount read-only. Ignored (no-op) on a provider without the
    /// capability, rejected with an error if explicitly requested as
    /// `true` on one.
    #[arg(long, env = "NIO_READ_ONLY", default_value_t = false)]
    pub read_only: bool,

    /// Volume label, where the selected provider supports one.
    #[arg(long, env = "NIO_VOLUME_NAME")]
    pub volume_name: Option<String>,

    /// Loopback port, where the selected provider supports one.
    #[arg(long, env = "NIO_PORT")]
    pub port: Option<u16>,

    /// Loopback host name, required by the WinFsp provider.
    #[arg(long, env = "NIO_LOOPBACK_HOST")]
    pub loopback_host_name: Option<String>,

    /// Raw `-o`-style flags, space separated, merged over the flags the
    /// builder derives from the other options.
    #[arg(long, env = "NIO_MOUNT_FLAGS", default_value = "")]
    pub mount_flags: String,

    /// Allow users other than the mount owner to access the file system.
    #[arg(long, env = "NIO_ALLOW_OTHER", default_value_t = false)]
    pub allow_other: bool,

    /// Auto-unmount on process exit, where the native binding supports it.
    #[arg(long, env = "NIO_AUTO_UNMOUNT", default_value_t = false)]
    pub auto_unmount: bool,

    /// Escalate to a forced unmount if a graceful one is refused.
    #[arg(long, env = "NIO_ALLOW_FORCED_UNMOUNT", default_value_t = false)]
    pub allow_forced_unmount: bool,
}
