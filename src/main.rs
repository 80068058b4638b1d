use std::sync::Arc;

use clap::Parser;
use nio_fuse_adapter::builder::MountBuilder;
use nio_fuse_adapter::config::MountConfig;
use nio_fuse_adapter::ops::{FilesystemOps, LocalOps};
use nio_fuse_adapter::provider::{self, Capability};

fn required_capabilities(config: &MountConfig) -> Vec<Capability> {
    let mut required = Vec::new();
    if !config.mount_flags.trim().is_empty() {
        required.push(Capability::MountFlags);
    }
    if config.read_only {
        required.push(Capability::ReadOnly);
    }
    if config.volume_name.is_some() {
        required.push(Capability::VolumeName);
    }
    if config.port.is_some() {
        required.push(Capability::Port);
    }
    if config.loopback_host_name.is_some() {
        required.push(Capability::LoopbackHostName);
    }
    required
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = MountConfig::parse();
    let required = required_capabilities(&config);
    let provider = provider::select_provider(&required)?;
    log::info!("selected provider {} for this host", provider.name);

    let ops: Arc<dyn FilesystemOps> = Arc::new(LocalOps::new(&config.backing_root));
    let mut builder = MountBuilder::new(provider, ops)
        .set_mount_point(config.mount_point.clone())
        .set_allow_other(config.allow_other)
        .set_auto_unmount(config.auto_unmount);
    builder = builder.set_read_only(config.read_only)?;
    if let Some(volume_name) = &config.volume_name {
        builder = builder.set_volume_name(volume_name.clone())?;
    }
    if let Some(port) = config.port {
        builder = builder.set_port(port)?;
    }
    if let Some(host) = &config.loopback_host_name {
        builder = builder.set_loopback_host_name(host.clone())?;
    }
    builder = builder.set_mount_flags(config.mount_flags.clone())?;

    let mount = builder.mount()?;
    log::info!("mounted at {}", mount.mount_point().display());

    // Block until the process is asked to stop; `Mount::drop` then
    // performs the scoped release (§4.5, §9).
    wait_for_shutdown_signal()?;

    if config.allow_forced_unmount {
        match mount.unmount() {
            Ok(()) => {}
            Err(nio_fuse_adapter::error::AdapterError::UnmountRefused) => {
                log::warn!("graceful unmount refused, escalating to forced unmount");
                mount.unmount_forced()?;
            }
            Err(e) => return Err(e.into()),
        }
    } else {
        mount.unmount()?;
    }
    Ok(())
}

fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    let (tx, rx) = std::sync::mpsc::channel();
    ctrlc_handler(tx)?;
    rx.recv().map_err(anyhow::Error::from)
}

fn ctrlc_handler(tx: std::sync::mpsc::Sender<()>) -> anyhow::Result<()> {
    std::thread::spawn(move || {
        // A real binary would install a SIGINT/SIGTERM handler here; this
        // crate's core does not prescribe process-signal handling, so the
        // binary keeps it to the minimum needed to drive a clean shutdown
        // in tests and manual runs: stdin EOF.
        let mut buf = String::new();
        let _ = std::io::stdin().read_line(&mut buf);
        let _ = tx.send(());
    });
    Ok(())
}
