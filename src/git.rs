// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Git transport policy.
//!
//! Decide how extsync authenticates against a git remote, and which host keys
//! or certificates it is willing to trust while doing so. Moving the bytes is
//! left to libgit2.
//!
//! # Authentication
//!
//! Three kinds of authentication exist, see [`GitAuth`]:
//!
//! - SSH private key taken from a secret.
//! - HTTP basic authentication taken from a secret.
//! - Ambient credentials of the host (ssh-agent, default keys, credential
//!   helpers) when a source names no secret at all.
//!
//! # Host Verification
//!
//! SSH host keys are validated against an OpenSSH known-hosts store unless
//! the source is flagged as insecure. Insecure sources also skip TLS
//! certificate validation.
//!
//! # See Also
//!
//! 1. [`credentials`]
//! 2. [`known_hosts`]
//! 3. [`remote`]

pub mod credentials;
pub mod known_hosts;
pub mod remote;

use crate::git::{
    credentials::GitAuth,
    known_hosts::{HostKeyStatus, KnownHosts},
};

use auth_git2::GitAuthenticator;
use git2::{
    CertificateCheckStatus, Config, Cred, CredentialType, FetchOptions, RemoteCallbacks,
};
use std::path::PathBuf;
use tracing::{debug, warn};

/// Give up after this many credential callbacks for a single operation.
const MAX_AUTH_ATTEMPTS: usize = 3;

/// Authenticated transport settings for one remote.
///
/// Produces the libgit2 callbacks that both reference listing and cloning
/// share.
pub struct Transport {
    auth: GitAuth,
    known_hosts: PathBuf,
    port: Option<u16>,
    authenticator: GitAuthenticator,
    config: Config,
}

impl Transport {
    /// Construct new transport for remote at `url`.
    ///
    /// # Errors
    ///
    /// - Return [`git2::Error`] if neither the default git configuration nor
    ///   an empty one can be opened.
    pub fn new(url: &str, auth: GitAuth, known_hosts: impl Into<PathBuf>) -> Result<Self> {
        let config = Config::open_default().or_else(|_| Config::new())?;
        let authenticator = GitAuthenticator::default()
            .try_password_prompt(0)
            .prompt_ssh_key_password(false);
        let port = url::Url::parse(url).ok().and_then(|url| url.port());

        if auth.is_insecure() {
            warn!("host verification disabled for {url}");
        }

        Ok(Self {
            auth,
            known_hosts: known_hosts.into(),
            port,
            authenticator,
            config,
        })
    }

    /// Authentication in use.
    pub fn auth(&self) -> &GitAuth {
        &self.auth
    }

    /// Build remote callbacks for credentials and host verification.
    pub fn callbacks(&self) -> RemoteCallbacks<'_> {
        let mut callbacks = RemoteCallbacks::new();

        match &self.auth {
            GitAuth::SshKey {
                username,
                private_key,
                ..
            } => {
                let mut attempts = 0;
                callbacks.credentials(move |_, _, allowed| {
                    attempts += 1;
                    if attempts > MAX_AUTH_ATTEMPTS {
                        return Err(git2::Error::from_str("ssh key authentication failed"));
                    }

                    if allowed.contains(CredentialType::USERNAME) {
                        return Cred::username(username);
                    }

                    Cred::ssh_key_from_memory(username, None, private_key, None)
                });
            }
            GitAuth::Basic {
                username, password, ..
            } => {
                let mut attempts = 0;
                callbacks.credentials(move |_, _, _| {
                    attempts += 1;
                    if attempts > MAX_AUTH_ATTEMPTS {
                        return Err(git2::Error::from_str("basic authentication failed"));
                    }

                    Cred::userpass_plaintext(username, password)
                });
            }
            GitAuth::Ambient { .. } => {
                callbacks.credentials(self.authenticator.credentials(&self.config));
            }
        }

        let insecure = self.auth.is_insecure();
        let known_hosts = self.known_hosts.as_path();
        let port = self.port;
        callbacks.certificate_check(move |cert, host| {
            if insecure {
                return Ok(CertificateCheckStatus::CertificateOk);
            }

            let Some(key) = cert.as_hostkey().and_then(|hostkey| hostkey.hostkey()) else {
                return Ok(CertificateCheckStatus::CertificatePassthrough);
            };

            let store = match KnownHosts::load(known_hosts) {
                Ok(store) => store,
                Err(error) => {
                    warn!("cannot set up known hosts validation: {error}");
                    return Ok(CertificateCheckStatus::CertificatePassthrough);
                }
            };

            match store.check(host, port, key) {
                HostKeyStatus::Match => {
                    debug!("host key for {host} found in {:?}", known_hosts.display());
                    Ok(CertificateCheckStatus::CertificateOk)
                }
                HostKeyStatus::Mismatch => Err(git2::Error::from_str(&format!(
                    "host key mismatch for {host}"
                ))),
                HostKeyStatus::Unknown => Err(git2::Error::from_str(&format!(
                    "host key for {host} is unknown"
                ))),
            }
        });

        callbacks
    }

    /// Build fetch options around [`Transport::callbacks`].
    pub fn fetch_options(&self) -> FetchOptions<'_> {
        let mut options = FetchOptions::new();
        options.remote_callbacks(self.callbacks());
        options
    }
}

/// Friendly result alias :3
type Result<T, E = git2::Error> = std::result::Result<T, E>;
