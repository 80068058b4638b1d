//! `MountBuilder` (§4.4): provider-specific mount parameter assembly and
//! flag translation.
//!
//! A builder is bound to one already-selected [`Provider`] for its whole
//! lifetime, the `-o` style flags and capability checks below only make
//! sense once a provider is fixed, and selection itself is `select_provider`'s
//! job (§4.3), not the builder's.

use std::path::PathBuf;
use std::sync::Arc;

use crate::bridge::AdapterBridge;
use crate::error::AdapterError;
use crate::mount::{FuserNativeMount, Mount, NativeMount};
use crate::ops::FilesystemOps;
use crate::provider::{Capability, Provider};

/// Builds a provider-bound mount request, then performs the native mount.
pub struct MountBuilder {
    provider: &'static Provider,
    ops: Arc<dyn FilesystemOps>,
    mount_point: Option<PathBuf>,
    read_only: bool,
    volume_name: Option<String>,
    port: Option<u16>,
    loopback_host_name: Option<String>,
    raw_flags: Vec<String>,
    allow_other: bool,
    auto_unmount: bool,
}

impl MountBuilder {
    pub fn new(provider: &'static Provider, ops: Arc<dyn FilesystemOps>) -> Self {
        Self {
            provider,
            ops,
            mount_point: None,
            read_only: false,
            volume_name: None,
            port: None,
            loopback_host_name: None,
            raw_flags: Vec::new(),
            allow_other: false,
            auto_unmount: false,
        }
    }

    fn require(&self, capability: Capability) -> Result<(), AdapterError> {
        if self.provider.supports(capability) {
            Ok(())
        } else {
            Err(AdapterError::UnsupportedCapability {
                provider: self.provider.name.to_string(),
                capability,
            })
        }
    }

    pub fn set_mount_point(mut self, path: impl Into<PathBuf>) -> Self {
        self.mount_point = Some(path.into());
        self
    }

    pub fn set_allow_other(mut self, allow_other: bool) -> Self {
        self.allow_other = allow_other;
        self
    }

    pub fn set_auto_unmount(mut self, auto_unmount: bool) -> Self {
        self.auto_unmount = auto_unmount;
        self
    }

    /// Unsupported-capability-plus-non-default-value is an error; the
    /// false/no-op case is left alone rather than rejected, so callers can
    /// pass through a CLI default without knowing which provider ended up
    /// selected.
    pub fn set_read_only(mut self, read_only: bool) -> Result<Self, AdapterError> {
        if read_only {
            self.require(Capability::ReadOnly)?;
        }
        self.read_only = read_only;
        Ok(self)
    }

    pub fn set_volume_name(mut self, name: impl Into<String>) -> Result<Self, AdapterError> {
        self.require(Capability::VolumeName)?;
        self.volume_name = Some(name.into());
        Ok(self)
    }

    pub fn set_port(mut self, port: u16) -> Result<Self, AdapterError> {
        self.require(Capability::Port)?;
        self.port = Some(port);
        Ok(self)
    }

    pub fn set_loopback_host_name(mut self, host: impl Into<String>) -> Result<Self, AdapterError> {
        self.require(Capability::LoopbackHostName)?;
        let host = host.into();
        if !crate::provider::winfsp_is_valid_loopback_host(&host) {
            return Err(AdapterError::InvalidMountParameter(format!(
                "loopback host name contains reserved characters: {host}"
            )));
        }
        self.loopback_host_name = Some(host);
        Ok(self)
    }

    /// Raw `-o`-style flags (space-separated), e.g. `-ovolname=x -r`.
    pub fn set_mount_flags(mut self, flags: impl Into<String>) -> Result<Self, AdapterError> {
        let flags = flags.into();
        let tokens: Vec<String> = flags.split_whitespace().map(String::from).collect();
        if !tokens.is_empty() {
            self.require(Capability::MountFlags)?;
        }
        self.raw_flags = tokens;
        Ok(self)
    }

    fn validate(&self) -> Result<&PathBuf, AdapterError> {
        let mount_point = self
            .mount_point
            .as_ref()
            .ok_or_else(|| AdapterError::InvalidMountParameter("mount point is required".into()))?;
        if self.provider.name == "winfsp" && self.loopback_host_name.is_none() {
            return Err(AdapterError::InvalidMountParameter(
                "winfsp mounts require a loopback host name".into(),
            ));
        }
        Ok(mount_point)
    }

    fn derived_flags(&self) -> Vec<String> {
        let mut flags: Vec<String> = self.provider.default_flags.iter().map(|s| s.to_string()).collect();
        match self.provider.name {
            "fuse-t" => {
                flags = crate::provider::macfuse_t_build_flags(
                    self.volume_name.as_deref(),
                    self.read_only,
                    self.port,
                );
            }
            "winfsp" => {
                if let Some(host) = &self.loopback_host_name {
                    // §6: "volume-or-uuid", fall back to a generated
                    // identifier when the caller didn't set a volume name.
                    let volume = self.volume_name.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                    flags.push(crate::provider::winfsp_build_volume_prefix(host, &volume));
                }
            }
            _ => {}
        }
        flags
    }

    /// Merge provider-derived flags with explicit user flags: dedup by the
    /// token preceding `=`, explicit flags override a builder-derived flag
    /// with the same key at that key's position, and any explicit flag with
    /// no builder-derived counterpart is appended, first-seen order
    /// preserved on both sides.
    fn merge_flags(derived: &[String], explicit: &[String]) -> Vec<String> {
        fn key(flag: &str) -> &str {
            flag.split('=').next().unwrap_or(flag)
        }
        let mut used = std::collections::HashSet::new();
        let mut merged = Vec::with_capacity(derived.len() + explicit.len());
        for flag in derived {
            let k = key(flag);
            if let Some(over) = explicit.iter().find(|f| key(f) == k) {
                if used.insert(k.to_string()) {
                    merged.push(over.clone());
                }
            } else {
                merged.push(flag.clone());
            }
        }
        for flag in explicit {
            let k = key(flag);
            if used.insert(k.to_string()) {
                merged.push(flag.clone());
            }
        }
        merged
    }

    fn translate_flag(flag: &str) -> fuser::MountOption {
        if flag == "-r" {
            fuser::MountOption::RO
        } else if let Some(rest) = flag.strip_prefix("-o") {
            fuser::MountOption::CUSTOM(rest.to_string())
        } else {
            fuser::MountOption::CUSTOM(flag.trim_start_matches('-').to_string())
        }
    }

    pub fn mount(self) -> Result<Mount, AdapterError> {
        let mount_point = self.validate()?.clone();
        let derived = self.derived_flags();
        let merged = Self::merge_flags(&derived, &self.raw_flags);

        match self.provider.name {
            "fuse-t" | "libfuse" => {
                let mut options = vec![
                    fuser::MountOption::FSName("nio-fuse-adapter".to_string()),
                    fuser::MountOption::DefaultPermissions,
                    if self.read_only { fuser::MountOption::RO } else { fuser::MountOption::RW },
                ];
                if self.allow_other {
                    options.push(fuser::MountOption::AllowOther);
                }
                if self.auto_unmount {
                    options.push(fuser::MountOption::AutoUnmount);
                }
                options.extend(merged.iter().map(|f| Self::translate_flag(f)));

                let bridge = AdapterBridge::new(self.ops.clone());
                let native = FuserNativeMount::spawn(bridge, &mount_point, &options)
                    .map_err(|e| AdapterError::MountFailed(e.to_string()))?;
                Ok(Mount::new(
                    mount_point,
                    Box::new(native) as Box<dyn NativeMount>,
                    self.ops,
                    self.provider.name,
                    self.provider.supports(Capability::UnmountForced),
                ))
            }
            "winfsp" => Err(AdapterError::MountFailed(
                "winfsp provider has no native binding compiled into this build".into(),
            )),
            other => Err(AdapterError::MountFailed(format!("unknown provider {other}"))),
        }
    }
}
