// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine default locations for the files extsync reads and writes when
//! the caller does not configure them explicitly.

use std::path::PathBuf;

/// Environment variable that overrides the directory holding the SSH
/// known-hosts store.
pub const SSH_DATA_PATH_ENV: &str = "EXTSYNC_SSH_DATA_PATH";

/// File name of the SSH known-hosts store.
pub const SSH_KNOWN_HOSTS_NAME: &str = "ssh_known_hosts";

/// Determine default absolute path to the shared output root.
///
/// Uses XDG Base Directory path `$XDG_DATA_HOME/extsync` as the default.
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_output_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|path| path.join("extsync"))
        .ok_or(NoWayHome)
}

/// Determine default absolute path to extsync's configuration directory.
///
/// Uses `$XDG_CONFIG_HOME/extsync`. Settings, manifests, and the secret store
/// live here unless configured otherwise.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn default_config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join("extsync"))
        .ok_or(NoWayHome)
}

/// Determine default absolute path to the SSH known-hosts store.
///
/// Honors [`SSH_DATA_PATH_ENV`] when it is set to a non-empty value,
/// otherwise falls back to `ssh_known_hosts` inside the configuration
/// directory.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn default_known_hosts_path() -> Result<PathBuf> {
    match std::env::var_os(SSH_DATA_PATH_ENV) {
        Some(dir) if !dir.is_empty() => Ok(PathBuf::from(dir).join(SSH_KNOWN_HOSTS_NAME)),
        _ => Ok(default_config_dir()?.join(SSH_KNOWN_HOSTS_NAME)),
    }
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;
