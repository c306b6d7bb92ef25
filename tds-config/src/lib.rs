//! Configuration files of the tape drive state catalogue
pub mod catalogue;

use std::path::Path;
use std::time::Duration;

use anyhow::Error;

use proxmox_sys::fs::CreateOptions;

/// Directory holding all configuration files
pub const CONFIGDIR: &str = "/etc/tape-drive-state";

/// Holds an exclusive or shared lock on a configuration lock file until dropped
pub struct ConfigLockGuard(#[allow(dead_code)] std::fs::File);

/// Open or create a lock file and lock it.
///
/// File mode is 0660.
/// Default timeout is 10 seconds.
pub fn open_config_lockfile<P: AsRef<Path>>(
    path: P,
    timeout: Option<Duration>,
    exclusive: bool,
) -> Result<ConfigLockGuard, Error> {
    let options =
        CreateOptions::new().perm(nix::sys::stat::Mode::from_bits_truncate(0o660));

    let timeout = timeout.unwrap_or(Duration::new(10, 0));

    let file = proxmox_sys::fs::open_file_locked(&path, timeout, exclusive, options)?;
    Ok(ConfigLockGuard(file))
}

/// Atomically write data to a configuration file with permission "0640"
pub fn replace_config<P: AsRef<Path>>(path: P, data: &[u8]) -> Result<(), Error> {
    let mode = nix::sys::stat::Mode::from_bits_truncate(0o0640);
    let options = CreateOptions::new().perm(mode);

    proxmox_sys::fs::replace_file(path, data, options, true)?;

    Ok(())
}
