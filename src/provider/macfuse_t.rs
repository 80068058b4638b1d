//! macOS FUSE-T provider (§6 backend-specific flag conventions).

use std::path::Path;

use super::{Capability, Provider};

/// §6: "macOS FUSE-T provider probes for the dynamic library at
/// `/usr/local/lib/libfuse-t.dylib`."
const LIBRARY_PATH: &str = "/usr/local/lib/libfuse-t.dylib";

fn os_match() -> bool {
    cfg!(target_os = "macos")
}

fn runtime_supported() -> bool {
    Path::new(LIBRARY_PATH).exists()
}

const CAPABILITIES: &[Capability] = &[
    Capability::MountFlags,
    Capability::MountWithinExistingParent,
    Capability::MountPointEmptyDir,
    Capability::ReadOnly,
    Capability::UnmountForced,
    Capability::VolumeName,
    Capability::LoopbackHostName,
    Capability::Port,
];

pub(super) fn provider() -> Provider {
    Provider {
        name: "fuse-t",
        priority: 100,
        capabilities: CAPABILITIES,
        os_match,
        runtime_supported,
        default_flags: &["-orwsize=262144"],
    }
}

/// Translate builder state into FUSE-T's `-o` flag convention:
/// `-ovolname=<name> -orwsize=262144`, optional `-l<port>`, read-only `-r`.
pub fn build_flags(volume_name: Option<&str>, read_only: bool, port: Option<u16>) -> Vec<String> {
    let mut flags = Vec::new();
    if let Some(name) = volume_name {
        flags.push(format!("-ovolname={name}"));
    }
    flags.push("-orwsize=262144".to_string());
    if let Some(port) = port {
        flags.push(format!("-l{port}"));
    }
    if read_only {
        flags.push("-r".to_string());
    }
    flags
}
