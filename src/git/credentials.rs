// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Credential derivation for git sources.

use crate::{
    extension::GitSource,
    secret::{SecretData, SecretLookup},
};

use regex::Regex;
use std::sync::LazyLock;

/// Username used for basic authentication when a secret only names a token.
pub const DEFAULT_TOKEN_USER: &str = "x-access-token";

static SSH_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(ssh://)?([^/:]*?)@[^@]+$").expect("ssh url regex is valid"));

/// Raw credentials read out of a secret.
#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct GitCredentials {
    pub ssh_private_key: Option<String>,
    pub username: String,
    pub password: String,
    pub insecure: bool,
}

impl GitCredentials {
    /// Resolve credentials of a git source through its secret reference.
    ///
    /// Sources without a secret reference get empty credentials, which means
    /// ambient authentication.
    ///
    /// # Errors
    ///
    /// - Return [`CredentialError::Secret`] if the referenced secret is
    ///   missing.
    /// - Return any error of [`GitCredentials::from_secret`].
    pub fn lookup(source: &GitSource, secrets: &dyn SecretLookup) -> Result<Self> {
        match &source.secret_ref {
            Some(key) => Self::from_secret(&source.url, &secrets.get(key)?),
            None => Ok(Self::default()),
        }
    }

    /// Read credentials for `url` out of a secret.
    ///
    /// - `ssh://` URLs require an `sshkey` entry.
    /// - `http://` and `https://` URLs read optional `git_user` and
    ///   `git_token` entries.
    /// - Any URL may carry an `insecure` boolean entry.
    ///
    /// # Errors
    ///
    /// - Return [`CredentialError::MissingSshKey`] if an SSH URL has no key.
    /// - Return [`CredentialError::InvalidInsecure`] if the insecure flag is
    ///   not a boolean.
    pub fn from_secret(url: &str, secret: &SecretData) -> Result<Self> {
        let mut credentials = Self::default();

        if url.starts_with("ssh://") {
            let key = secret
                .get_string("sshkey")
                .ok_or(CredentialError::MissingSshKey)?;
            credentials.ssh_private_key = Some(key);
        }

        if url.starts_with("http://") || url.starts_with("https://") {
            credentials.username = secret.get_string("git_user").unwrap_or_default();
            credentials.password = secret.get_string("git_token").unwrap_or_default();
        }

        if let Some(value) = secret.get_string("insecure") {
            credentials.insecure =
                parse_bool(value.trim()).ok_or(CredentialError::InvalidInsecure { value })?;
        }

        Ok(credentials)
    }
}

/// Authentication handed to the git transport.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum GitAuth {
    /// Public key authentication with an in-memory private key.
    SshKey {
        username: String,
        private_key: String,
        insecure: bool,
    },

    /// HTTP basic authentication.
    Basic {
        username: String,
        password: String,
        insecure: bool,
    },

    /// Whatever the host already has configured.
    Ambient { insecure: bool },
}

impl GitAuth {
    /// Select authentication for `url` from resolved credentials.
    ///
    /// SSH URLs with a private key use key authentication as the user named in
    /// the URL. Plain HTTP URLs, and HTTPS URLs with a password, use basic
    /// authentication. Everything else falls back to ambient credentials.
    pub fn new(url: &str, credentials: &GitCredentials) -> Self {
        let insecure = credentials.insecure;

        let ssh_user = ssh_url_user(url).or_else(|| url.starts_with("ssh://").then(String::new));
        if let Some(user) = ssh_user {
            if let Some(private_key) = &credentials.ssh_private_key {
                return Self::SshKey {
                    username: if user.is_empty() { "git".into() } else { user },
                    private_key: private_key.clone(),
                    insecure,
                };
            }
        }

        let is_http = url.starts_with("http://");
        let is_https = url.starts_with("https://");
        if is_http || (is_https && !credentials.password.is_empty()) {
            let username = if credentials.username.is_empty() {
                DEFAULT_TOKEN_USER.into()
            } else {
                credentials.username.clone()
            };

            return Self::Basic {
                username,
                password: credentials.password.clone(),
                insecure,
            };
        }

        Self::Ambient { insecure }
    }

    /// Host verification is disabled.
    pub fn is_insecure(&self) -> bool {
        match self {
            Self::SshKey { insecure, .. }
            | Self::Basic { insecure, .. }
            | Self::Ambient { insecure } => *insecure,
        }
    }
}

/// Determine SSH user embedded in URL.
///
/// Recognizes both `ssh://user@host/path` and `user@host:path` forms.
pub fn ssh_url_user(url: &str) -> Option<String> {
    SSH_URL
        .captures(url)
        .and_then(|captures| captures.get(2))
        .map(|user| user.as_str().to_string())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

/// Credential derivation error types.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// SSH URL without an `sshkey` secret entry.
    #[error("missing sshkey in the provided secret")]
    MissingSshKey,

    /// Insecure flag is not a boolean.
    #[error("invalid insecure flag {value:?} in the provided secret")]
    InvalidInsecure { value: String },

    /// Secret cannot be looked up.
    #[error(transparent)]
    Secret(#[from] crate::secret::SecretError),
}

/// Friendly result alias :3
type Result<T, E = CredentialError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    #[test]
    fn ssh_url_requires_sshkey() {
        let secret = SecretData::new().with("git_user", "bot");
        let result = GitCredentials::from_secret("ssh://git@host/repo.git", &secret);
        assert!(matches!(result, Err(CredentialError::MissingSshKey)));
    }

    #[test]
    fn http_url_without_entries_is_anonymous() -> anyhow::Result<()> {
        let result = GitCredentials::from_secret("https://host/repo.git", &SecretData::new())?;
        assert_eq!(result, GitCredentials::default());

        Ok(())
    }

    #[test]
    fn insecure_flag_parsed() -> anyhow::Result<()> {
        let secret = SecretData::new().with("insecure", "true");
        let result = GitCredentials::from_secret("https://host/repo.git", &secret)?;
        assert!(result.insecure);

        let secret = SecretData::new().with("insecure", "maybe");
        let result = GitCredentials::from_secret("https://host/repo.git", &secret);
        assert!(matches!(
            result,
            Err(CredentialError::InvalidInsecure { .. })
        ));

        Ok(())
    }

    #[test_case("ssh://git@host/repo.git", Some("git"); "ssh scheme")]
    #[test_case("deploy@host:org/repo.git", Some("deploy"); "scp form")]
    #[test_case("https://bot@host/repo.git", None; "https with user")]
    #[test_case("https://host/repo.git", None; "https")]
    #[test]
    fn detect_ssh_user(url: &str, expect: Option<&str>) {
        use pretty_assertions::assert_eq;
        assert_eq!(ssh_url_user(url).as_deref(), expect);
    }

    #[test]
    fn token_only_defaults_username() {
        let credentials = GitCredentials {
            password: "hunter2".into(),
            ..Default::default()
        };
        let result = GitAuth::new("https://host/repo.git", &credentials);
        let expect = GitAuth::Basic {
            username: DEFAULT_TOKEN_USER.into(),
            password: "hunter2".into(),
            insecure: false,
        };
        assert_eq!(result, expect);
    }

    #[test]
    fn https_without_password_is_ambient() {
        let credentials = GitCredentials {
            username: "bot".into(),
            insecure: true,
            ..Default::default()
        };
        let result = GitAuth::new("https://host/repo.git", &credentials);
        assert_eq!(result, GitAuth::Ambient { insecure: true });
    }

    #[test]
    fn ssh_key_uses_url_user() {
        let credentials = GitCredentials {
            ssh_private_key: Some("KEY".into()),
            ..Default::default()
        };
        let result = GitAuth::new("ssh://deploy@host/repo.git", &credentials);
        let expect = GitAuth::SshKey {
            username: "deploy".into(),
            private_key: "KEY".into(),
            insecure: false,
        };
        assert_eq!(result, expect);
    }
}
