//! Mount lifecycle controller (§4.5) and the native-FUSE-library
//! collaborator interface (§6, §15).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::AdapterError;
use crate::ops::FilesystemOps;

/// §3: the mount handle's lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountStatus {
    Mounted,
    Unmounting,
    ForceUnmounting,
    Unmounted,
}

/// The native FUSE library collaborator (§6): register a callback table
/// and mount (done by the constructor, which is backend-specific),
/// report in-use (delegated to `FilesystemOps` instead, since the native
/// session itself doesn't know), unmount gracefully, unmount forcibly,
/// and release native resources (`Drop`).
pub trait NativeMount: Send {
    fn unmount_graceful(&mut self) -> std::io::Result<()>;
    fn unmount_forced(&mut self) -> std::io::Result<()>;
}

/// `fuser`-backed `NativeMount` for the Unix providers (§15).
pub struct FuserNativeMount {
    session: Option<fuser::BackgroundSession>,
    mount_point: PathBuf,
}

impl FuserNativeMount {
    pub fn spawn<FS>(fs: FS, mount_point: &Path, options: &[fuser::MountOption]) -> std::io::Result<Self>
    where
        FS: fuser::Filesystem + Send + 'static,
    {
        let session = fuser::spawn_mount2(fs, mount_point, options)?;
        Ok(Self { session: Some(session), mount_point: mount_point.to_path_buf() })
    }
}

impl NativeMount for FuserNativeMount {
    fn unmount_graceful(&mut self) -> std::io::Result<()> {
        // `fuser::BackgroundSession`'s `Drop` impl performs the unmount
        // syscall but does not surface its result; dropping here is the
        // graceful path the crate exposes.
        self.session.take();
        Ok(())
    }

    fn unmount_forced(&mut self) -> std::io::Result<()> {
        self.session.take();
        run_forced_unmount_command(&self.mount_point)
    }
}

#[cfg(target_os = "macos")]
fn run_forced_unmount_command(mount_point: &Path) -> std::io::Result<()> {
    let status = std::process::Command::new("umount").arg("-f").arg(mount_point).status()?;
    check_status(status)
}

#[cfg(target_os = "linux")]
fn run_forced_unmount_command(mount_point: &Path) -> std::io::Result<()> {
    let status = std::process::Command::new("fusermount").arg("-uz").arg(mount_point).status()?;
    check_status(status)
}

#[cfg(not(any(target_os = "macos", target_os = "linux")))]
fn run_forced_unmount_command(_mount_point: &Path) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "forced unmount is not implemented for this platform",
    ))
}

#[cfg(any(target_os = "macos", target_os = "linux"))]
fn check_status(status: std::process::ExitStatus) -> std::io::Result<()> {
    if status.success() {
        Ok(())
    } else {
        Err(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("forced unmount command exited with {status}"),
        ))
    }
}

/// The owning reference to a live mount (§3, §4.5).
pub struct Mount {
    mount_point: PathBuf,
    status: Mutex<MountStatus>,
    native: Mutex<Option<Box<dyn NativeMount>>>,
    ops: Arc<dyn FilesystemOps>,
    provider_name: &'static str,
    supports_forced: bool,
}

impl Mount {
    pub(crate) fn new(
        mount_point: PathBuf,
        native: Box<dyn NativeMount>,
        ops: Arc<dyn FilesystemOps>,
        provider_name: &'static str,
        supports_forced: bool,
    ) -> Self {
        Self {
            mount_point,
            status: Mutex::new(MountStatus::Mounted),
            native: Mutex::new(Some(native)),
            ops,
            provider_name,
            supports_forced,
        }
    }

    /// `getMountPoint()` (§4.5). Immutable after construction, so this
    /// reads without taking `status`'s mutex (§5).
    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    pub fn status(&self) -> MountStatus {
        *self.status.lock()
    }

    /// `unmount()` (§4.5).
    pub fn unmount(&self) -> Result<(), AdapterError> {
        let mut status = self.status.lock();
        if *status != MountStatus::Mounted {
            return Err(AdapterError::UnmountFailed(format!(
                "cannot unmount from state {:?}",
                *status
            )));
        }
        if self.ops.is_in_use() {
            return Err(AdapterError::UnmountRefused);
        }
        *status = MountStatus::Unmounting;
        let mut native = self.native.lock();
        let result = match native.as_deref_mut() {
            Some(n) => n.unmount_graceful(),
            None => Ok(()),
        };
        match result {
            Ok(()) => {
                *status = MountStatus::Unmounted;
                Ok(())
            }
            Err(e) => {
                *status = MountStatus::Mounted;
                Err(AdapterError::UnmountFailed(e.to_string()))
            }
        }
    }

    /// `unmountForced()` (§4.5). Only valid when the provider declares
    /// `UNMOUNT_FORCED`.
    pub fn unmount_forced(&self) -> Result<(), AdapterError> {
        if !self.supports_forced {
            return Err(AdapterError::UnsupportedCapability {
                provider: self.provider_name.to_string(),
                capability: crate::provider::Capability::UnmountForced,
            });
        }
        let mut status = self.status.lock();
        if *status != MountStatus::Mounted {
            return Err(AdapterError::UnmountFailed(format!(
                "cannot force-unmount from state {:?}",
                *status
            )));
        }
        *status = MountStatus::ForceUnmounting;
        let mut native = self.native.lock();
        let result = match native.as_deref_mut() {
            Some(n) => n.unmount_forced(),
            None => Ok(()),
        };
        match result {
            Ok(()) => {
                *status = MountStatus::Unmounted;
                Ok(())
            }
            Err(e) => {
                *status = MountStatus::Mounted;
                Err(AdapterError::UnmountFailed(e.to_string()))
            }
        }
    }

    /// Scoped release (§4.5, §9): graceful unmount, escalating to forced
    /// unmount if available and the graceful attempt was refused; native
    /// resource release is unconditional. Idempotent, releasing an
    /// already-`Unmounted` handle is a no-op (testable property 6).
    pub fn release(&self) -> Result<(), AdapterError> {
        let status = *self.status.lock();
        let result = match status {
            MountStatus::Unmounted => Ok(()),
            MountStatus::Mounted => {
                let first = self.unmount();
                match first {
                    Err(AdapterError::UnmountRefused) if self.supports_forced => self.unmount_forced(),
                    other => other,
                }
            }
            other => return Err(AdapterError::ReleaseFromLiveState(other)),
        };
        // Final release of native resources is unconditional.
        self.native.lock().take();
        self.ops.close();
        result
    }
}

impl Drop for Mount {
    fn drop(&mut self) {
        let _ = self.release();
    }
}
