// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the settings file that extsync reads on startup.
//! File I/O is left to the caller to figure out.

use crate::path::{default_config_dir, default_known_hosts_path, default_output_dir, NoWayHome};

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    str::FromStr,
};

/// Default name of the derived resource override document.
pub const DEFAULT_OVERRIDE_NAME: &str = "argocd-resource-override-cm";

/// Settings layout.
///
/// # General Layout
///
/// ```toml
/// output_path = "$XDG_DATA_HOME/extsync"
/// manifests = "~/.config/extsync/extensions"
/// secrets = "~/.config/extsync/secrets.toml"
/// known_hosts = "~/.config/extsync/ssh_known_hosts"
///
/// [override_config_map]
/// name = "argocd-resource-override-cm"
/// namespace = "argocd"
/// path = "~/.local/share/extsync/.overrides.yaml"
/// ```
///
/// Every path field undergoes shell expansion when parsed.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// Shared output root for every extension.
    pub output_path: PathBuf,

    /// Directory of extension manifests.
    pub manifests: PathBuf,

    /// Secret store file.
    pub secrets: PathBuf,

    /// SSH known-hosts store.
    pub known_hosts: PathBuf,

    /// Where the derived override document goes.
    pub override_config_map: OverrideSettings,
}

impl Settings {
    /// Construct settings from the default XDG locations.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::NoWayHome`] if home directory cannot be
    ///   determined.
    pub fn try_default() -> Result<Self> {
        let output_path = default_output_dir()?;
        let config_dir = default_config_dir()?;

        Ok(Self {
            manifests: config_dir.join("extensions"),
            secrets: config_dir.join("secrets.toml"),
            known_hosts: default_known_hosts_path()?,
            override_config_map: OverrideSettings {
                name: DEFAULT_OVERRIDE_NAME.into(),
                namespace: "argocd".into(),
                path: output_path.join(".overrides.yaml"),
            },
            output_path,
        })
    }

    /// Point every output-root-relative default at a new output root.
    pub fn with_output_path(mut self, output_path: impl Into<PathBuf>) -> Self {
        let output_path = output_path.into();
        if let Ok(rest) = self.override_config_map.path.strip_prefix(&self.output_path) {
            self.override_config_map.path = output_path.join(rest);
        }
        self.output_path = output_path;
        self
    }
}

impl FromStr for Settings {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut settings: Settings = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on every path field.
        settings.output_path = expand_path(&settings.output_path)?;
        settings.manifests = expand_path(&settings.manifests)?;
        settings.secrets = expand_path(&settings.secrets)?;
        settings.known_hosts = expand_path(&settings.known_hosts)?;
        settings.override_config_map.path = expand_path(&settings.override_config_map.path)?;

        Ok(settings)
    }
}

impl Display for Settings {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Placement of the derived resource override document.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct OverrideSettings {
    /// Name recorded in the document.
    pub name: String,

    /// Namespace recorded in the document.
    pub namespace: String,

    /// File the document is written to.
    pub path: PathBuf,
}

fn expand_path(path: &Path) -> Result<PathBuf> {
    Ok(PathBuf::from(
        shellexpand::full(path.to_string_lossy().as_ref())
            .map_err(ConfigError::ShellExpansion)?
            .into_owned(),
    ))
}

/// Configuration error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Failed to determine default locations.
    #[error(transparent)]
    NoWayHome(#[from] NoWayHome),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[sealed_test(env = [("EXTSYNC_HOME", "/srv/extsync")])]
    fn deserialize_settings() -> anyhow::Result<()> {
        let result: Settings = r#"
            output_path = "$EXTSYNC_HOME/out"
            manifests = "$EXTSYNC_HOME/extensions"
            secrets = "${EXTSYNC_HOME}/secrets.toml"
            known_hosts = "/etc/ssh/ssh_known_hosts"

            [override_config_map]
            name = "argocd-resource-override-cm"
            namespace = "argocd"
            path = "$EXTSYNC_HOME/out/.overrides.yaml"
        "#
        .parse()?;

        let expect = Settings {
            output_path: "/srv/extsync/out".into(),
            manifests: "/srv/extsync/extensions".into(),
            secrets: "/srv/extsync/secrets.toml".into(),
            known_hosts: "/etc/ssh/ssh_known_hosts".into(),
            override_config_map: OverrideSettings {
                name: "argocd-resource-override-cm".into(),
                namespace: "argocd".into(),
                path: "/srv/extsync/out/.overrides.yaml".into(),
            },
        };

        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn serialize_settings() {
        let result = Settings {
            output_path: "/srv/out".into(),
            manifests: "/srv/extensions".into(),
            secrets: "/srv/secrets.toml".into(),
            known_hosts: "/srv/ssh_known_hosts".into(),
            override_config_map: OverrideSettings {
                name: "overrides".into(),
                namespace: "argocd".into(),
                path: "/srv/out/.overrides.yaml".into(),
            },
        }
        .to_string();

        let expect = indoc! {r#"
            output_path = "/srv/out"
            manifests = "/srv/extensions"
            secrets = "/srv/secrets.toml"
            known_hosts = "/srv/ssh_known_hosts"

            [override_config_map]
            name = "overrides"
            namespace = "argocd"
            path = "/srv/out/.overrides.yaml"
        "#};

        assert_eq!(result, expect);
    }

    #[test]
    fn with_output_path_moves_override_document() {
        let settings = Settings {
            output_path: "/srv/out".into(),
            manifests: "/srv/extensions".into(),
            secrets: "/srv/secrets.toml".into(),
            known_hosts: "/srv/ssh_known_hosts".into(),
            override_config_map: OverrideSettings {
                name: "overrides".into(),
                namespace: "argocd".into(),
                path: "/srv/out/.overrides.yaml".into(),
            },
        }
        .with_output_path("/tmp/out");

        assert_eq!(settings.output_path, PathBuf::from("/tmp/out"));
        assert_eq!(
            settings.override_config_map.path,
            PathBuf::from("/tmp/out/.overrides.yaml")
        );
    }
}
