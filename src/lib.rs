//! A FUSE adapter that exposes an abstract, host-provided file system as a
//! locally mounted file system (§1).
//!
//! [`lock`] is the concurrency core: a hierarchical path-lock manager that
//! lets disjoint subtrees proceed in parallel while keeping rename and
//! structural mutation deadlock-free. [`provider`] and [`builder`] handle
//! choosing and configuring the native FUSE backend for the current host.
//! [`bridge`] wires the two together behind `fuser::Filesystem`.

pub mod bridge;
pub mod builder;
pub mod config;
pub mod error;
pub mod lock;
pub mod mount;
pub mod ops;
pub mod path;
pub mod provider;
