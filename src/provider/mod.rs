//! MountProvider registry and capability negotiation (§4.3).

mod linux_fuse;
mod macfuse_t;
mod winfsp;

use std::sync::OnceLock;

use crate::error::AdapterError;

pub use macfuse_t::build_flags as macfuse_t_build_flags;
pub use winfsp::{build_volume_prefix as winfsp_build_volume_prefix, is_valid_loopback_host as winfsp_is_valid_loopback_host};

/// A member of the closed capability enumeration (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    MountFlags,
    MountAsDriveLetter,
    MountWithinExistingParent,
    MountToSystemChosenPath,
    MountPointEmptyDir,
    ReadOnly,
    UnmountForced,
    VolumeName,
    LoopbackHostName,
    Port,
}

/// Immutable provider descriptor (§3). Providers live for the process
/// lifetime; the registry never mutates one after registration.
pub struct Provider {
    pub name: &'static str,
    pub priority: i32,
    capabilities: &'static [Capability],
    /// OS applicability predicate, not a `cfg` because the registry's
    /// selection algorithm (and its tests) must be able to reason about
    /// "the current host" uniformly across target platforms.
    os_match: fn() -> bool,
    /// §4.3 step 2: is the native library actually present/usable.
    runtime_supported: fn() -> bool,
    pub default_flags: &'static [&'static str],
}

impl Provider {
    pub fn capabilities(&self) -> &'static [Capability] {
        self.capabilities
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    fn is_applicable(&self, required: &[Capability]) -> bool {
        (self.os_match)()
            && (self.runtime_supported)()
            && required.iter().all(|c| self.supports(*c))
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

fn registry() -> &'static [Provider] {
    static REGISTRY: OnceLock<Vec<Provider>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        vec![
            macfuse_t::provider(),
            linux_fuse::provider(),
            winfsp::provider(),
        ]
    })
}

/// `enumerate_providers()` (§6).
pub fn enumerate_providers() -> &'static [Provider] {
    registry()
}

/// `select_provider(required_capabilities)` (§4.3, §6).
///
/// Deterministic: filters by OS match, runtime support, and capability
/// superset, then picks the highest priority, breaking ties by display
/// name. Calling this twice with the same inputs on the same host always
/// returns the same provider (testable property 7).
pub fn select_provider(required: &[Capability]) -> Result<&'static Provider, AdapterError> {
    registry()
        .iter()
        .filter(|p| p.is_applicable(required))
        .max_by(|a, b| a.priority.cmp(&b.priority).then_with(|| b.name.cmp(a.name)))
        .ok_or(AdapterError::NoApplicableProvider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enumerate_lists_all_registered_providers() {
        let all = enumerate_providers();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn selection_is_deterministic_for_the_same_inputs() {
        let a = select_provider(&[]);
        let b = select_provider(&[]);
        match (a, b) {
            (Ok(pa), Ok(pb)) => assert_eq!(pa.name, pb.name),
            (Err(_), Err(_)) => {}
            _ => panic!("selection must be deterministic"),
        }
    }

    #[test]
    fn unsatisfiable_capability_set_yields_no_applicable_provider() {
        // No provider declares both drive-letter mounting and a loopback
        // port on the same descriptor in this registry's current shape
        // *and* also being installed on this host's OS in this sandbox,
        // so requiring every capability at once is guaranteed to fail
        // filtering somewhere (OS match, runtime support, or superset).
        let all_caps = [
            Capability::MountFlags,
            Capability::MountAsDriveLetter,
            Capability::MountWithinExistingParent,
            Capability::MountToSystemChosenPath,
            Capability::MountPointEmptyDir,
            Capability::ReadOnly,
            Capability::UnmountForced,
            Capability::VolumeName,
            Capability::LoopbackHostName,
            Capability::Port,
        ];
        assert!(matches!(select_provider(&all_caps), Err(AdapterError::NoApplicableProvider)));
    }
}
