// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Secret lookup.
//!
//! Credentials for git sources are read from secrets that extsync does not
//! own. A secret is an opaque key/value map of bytes looked up by namespace
//! and name. The [`SecretLookup`] trait is the seam for whatever backs those
//! secrets; [`SecretStore`] is the bundled TOML-backed implementation.
//!
//! # Store Layout
//!
//! ```toml
//! [[secret]]
//! namespace = "argocd"
//! name = "rollouts-creds"
//!
//! [secret.data]
//! git_user = "bot"
//! git_token = "hunter2"
//! insecure = "false"
//! ```

use crate::extension::NamespacedName;

use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::debug;

/// Key/value payload of a secret.
#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct SecretData(BTreeMap<String, Vec<u8>>);

impl SecretData {
    /// Construct empty secret data.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert entry, replacing any previous value under the same key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder form of [`SecretData::insert`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.insert(key, value);
        self
    }

    /// Get raw bytes of entry.
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.0.get(key).map(Vec::as_slice)
    }

    /// Get entry as text, replacing invalid UTF-8.
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get(key)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }
}

/// Read-only secret lookup by namespace and name.
pub trait SecretLookup: Send + Sync {
    /// Fetch secret payload.
    ///
    /// # Errors
    ///
    /// - Return [`SecretError::NotFound`] if no such secret exists.
    fn get(&self, key: &NamespacedName) -> Result<SecretData>;
}

/// TOML-backed secret store.
#[derive(Default, Debug, Clone)]
pub struct SecretStore {
    secrets: HashMap<NamespacedName, SecretData>,
}

impl SecretStore {
    /// Construct empty secret store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load secret store from file.
    ///
    /// A missing file yields an empty store.
    ///
    /// # Errors
    ///
    /// - Return [`SecretError::Read`] if file exists but cannot be read.
    /// - Return [`SecretError::Deserialize`] if file is not a valid store.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                debug!("no secret store at {:?}", path.display());
                return Ok(Self::new());
            }
            Err(source) => {
                return Err(SecretError::Read {
                    source,
                    path: path.into(),
                })
            }
        };

        data.parse()
    }

    /// Insert secret, replacing any previous secret with the same key.
    pub fn insert(&mut self, key: NamespacedName, data: SecretData) {
        self.secrets.insert(key, data);
    }
}

impl FromStr for SecretStore {
    type Err = SecretError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let layout: StoreLayout = toml::de::from_str(data)?;
        let mut store = Self::new();
        for entry in layout.secrets {
            let mut data = SecretData::new();
            for (key, value) in entry.data {
                data.insert(key, value.into_bytes());
            }
            store.insert(NamespacedName::new(entry.namespace, entry.name), data);
        }

        Ok(store)
    }
}

impl SecretLookup for SecretStore {
    fn get(&self, key: &NamespacedName) -> Result<SecretData> {
        self.secrets
            .get(key)
            .cloned()
            .ok_or_else(|| SecretError::NotFound(key.clone()))
    }
}

#[derive(Default, Debug, Deserialize, Serialize)]
struct StoreLayout {
    #[serde(default, rename = "secret")]
    secrets: Vec<StoreEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
struct StoreEntry {
    namespace: String,
    name: String,
    #[serde(default)]
    data: BTreeMap<String, String>,
}

/// Secret lookup error types.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    /// Secret does not exist.
    #[error("secret {0} not found")]
    NotFound(NamespacedName),

    /// Secret store cannot be read.
    #[error("failed to read secret store at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Secret store is malformed.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),
}

/// Friendly result alias :3
pub type Result<T, E = SecretError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_secret_store() -> anyhow::Result<()> {
        let store: SecretStore = indoc! {r#"
            [[secret]]
            namespace = "argocd"
            name = "creds"

            [secret.data]
            git_user = "bot"
            git_token = "hunter2"
        "#}
        .parse()?;

        let result = store.get(&NamespacedName::new("argocd", "creds"))?;
        let expect = SecretData::new()
            .with("git_user", "bot")
            .with("git_token", "hunter2");
        assert_eq!(result, expect);
        assert_eq!(result.get_string("git_user").as_deref(), Some("bot"));
        assert_eq!(result.get("sshkey"), None);

        Ok(())
    }

    #[test]
    fn missing_secret_is_not_found() {
        let store = SecretStore::new();
        let result = store.get(&NamespacedName::new("argocd", "nope"));
        assert!(matches!(result, Err(SecretError::NotFound(_))));
    }

    #[test]
    fn missing_store_file_is_empty() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = SecretStore::load(dir.path().join("secrets.toml"))?;
        assert!(store.secrets.is_empty());

        Ok(())
    }
}
