// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Derived resource override document.
//!
//! Resource health scripts placed by any extension follow a fixed layout,
//! `resources/<group>/<kind>/health.lua`, under the shared output root. After
//! every content change the whole layout is collected into one override map
//! keyed by `<group>/<kind>`, wrapped in a config-map document, and pushed to
//! an [`OverrideSink`]. The output root is the source of truth, so the push
//! is idempotent.

use crate::{config::OverrideSettings, fetch::RESOURCES_DIR, sync::write_bytes};

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};
use tracing::{debug, instrument};

/// Health script file name inside a resource kind directory.
pub const HEALTH_SCRIPT: &str = "health.lua";

/// Label marking the document as consumed by the platform.
pub const PART_OF_LABEL: (&str, &str) = ("app.kubernetes.io/part-of", "argocd");

/// Customization of one resource kind.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct ResourceOverride {
    #[serde(rename = "health.lua", default, skip_serializing_if = "String::is_empty")]
    pub health_lua: String,
}

/// Overrides keyed by `<group>/<kind>`.
pub type ResourceOverrides = BTreeMap<String, ResourceOverride>;

/// Collect every resource override under the output root.
///
/// A missing `resources/` directory yields an empty map. A kind directory
/// without a health script yields an empty override.
///
/// # Errors
///
/// - Return [`OverrideError::NotADirectory`] if a group or kind entry is not
///   a directory.
/// - Return [`OverrideError::Io`] if the layout cannot be read.
#[instrument(level = "debug")]
pub fn collect_resource_overrides(output_path: &Path) -> Result<ResourceOverrides> {
    let resources = output_path.join(RESOURCES_DIR);
    let mut overrides = ResourceOverrides::new();

    let groups = match std::fs::read_dir(&resources) {
        Ok(groups) => groups,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(overrides),
        Err(source) => return Err(OverrideError::io(source, &resources)),
    };

    for group in sorted_entries(groups, &resources)? {
        if !group.is_dir() {
            return Err(OverrideError::NotADirectory(group));
        }

        let kinds = std::fs::read_dir(&group).map_err(|source| OverrideError::io(source, &group))?;
        for kind in sorted_entries(kinds, &group)? {
            if !kind.is_dir() {
                return Err(OverrideError::NotADirectory(kind));
            }

            let script = kind.join(HEALTH_SCRIPT);
            let health_lua = match std::fs::read_to_string(&script) {
                Ok(script) => script,
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => String::new(),
                Err(source) => return Err(OverrideError::io(source, &script)),
            };

            let key = format!("{}/{}", file_name(&group), file_name(&kind));
            if overrides.contains_key(&key) {
                return Err(OverrideError::DuplicateKey(key));
            }
            overrides.insert(key, ResourceOverride { health_lua });
        }
    }

    debug!("collected {} resource overrides", overrides.len());
    Ok(overrides)
}

fn sorted_entries(entries: std::fs::ReadDir, dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = entries
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|source| OverrideError::io(source, dir))?;
    paths.sort();
    Ok(paths)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Config-map document carrying resource overrides.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideConfigMap {
    pub api_version: String,
    pub kind: String,
    pub metadata: OverrideMetadata,
    pub data: BTreeMap<String, String>,
}

#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct OverrideMetadata {
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
}

impl OverrideConfigMap {
    /// Wrap overrides into a config-map document.
    ///
    /// The overrides are serialized as YAML under the `resources` data key.
    ///
    /// # Errors
    ///
    /// - Return [`OverrideError::Encode`] if the overrides cannot be
    ///   serialized.
    pub fn build(
        name: impl Into<String>,
        namespace: impl Into<String>,
        overrides: &ResourceOverrides,
    ) -> Result<Self> {
        let resources = serde_yaml_ng::to_string(overrides)?;
        let (label, value) = PART_OF_LABEL;

        Ok(Self {
            api_version: "v1".into(),
            kind: "ConfigMap".into(),
            metadata: OverrideMetadata {
                name: name.into(),
                namespace: namespace.into(),
                labels: BTreeMap::from([(label.into(), value.into())]),
            },
            data: BTreeMap::from([("resources".into(), resources)]),
        })
    }
}

/// Destination of the derived override document.
pub trait OverrideSink: Send + Sync {
    /// Create or replace the override document.
    ///
    /// # Errors
    ///
    /// - Return [`OverrideError`] if the document cannot be stored.
    fn push(&self, overrides: &ResourceOverrides) -> Result<()>;
}

/// Sink writing the override document as a YAML file.
#[derive(Debug, Clone)]
pub struct FileOverrideSink {
    name: String,
    namespace: String,
    path: PathBuf,
}

impl FileOverrideSink {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }
}

impl From<&OverrideSettings> for FileOverrideSink {
    fn from(settings: &OverrideSettings) -> Self {
        Self::new(&settings.name, &settings.namespace, &settings.path)
    }
}

impl OverrideSink for FileOverrideSink {
    fn push(&self, overrides: &ResourceOverrides) -> Result<()> {
        let config_map = OverrideConfigMap::build(&self.name, &self.namespace, overrides)?;
        let document = serde_yaml_ng::to_string(&config_map)?;
        write_bytes(&self.path, document.as_bytes())
            .map_err(|error| OverrideError::Store(Box::new(error)))?;
        debug!("wrote override document to {:?}", self.path.display());

        Ok(())
    }
}

/// Override aggregation error types.
#[derive(Debug, thiserror::Error)]
pub enum OverrideError {
    /// Entry in the resource layout is not a directory.
    #[error("extension path {:?} is not a directory", .0.display())]
    NotADirectory(PathBuf),

    /// Two directories produced the same key.
    #[error("resource override already defined for key {0:?}")]
    DuplicateKey(String),

    /// Resource layout cannot be read.
    #[error("failed to read {:?}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Document cannot be serialized.
    #[error(transparent)]
    Encode(#[from] serde_yaml_ng::Error),

    /// Sink rejects the document.
    #[error("failed to store resource override document")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl OverrideError {
    fn io(source: std::io::Error, path: &Path) -> Self {
        Self::Io {
            source,
            path: path.into(),
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = OverrideError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn place(root: &Path, relative: &str, contents: &str) -> anyhow::Result<()> {
        let path = root.join(relative);
        mkdirp::mkdirp(path.parent().unwrap_or(root))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    #[test]
    fn missing_resources_is_empty() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        assert_eq!(collect_resource_overrides(dir.path())?, ResourceOverrides::new());

        Ok(())
    }

    #[test]
    fn collect_health_scripts() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        place(dir.path(), "resources/argoproj.io/Rollout/health.lua", "return hs")?;
        place(dir.path(), "resources/apps/Deployment/actions.lua", "noop")?;

        let result = collect_resource_overrides(dir.path())?;
        let expect = ResourceOverrides::from([
            ("apps/Deployment".into(), ResourceOverride::default()),
            (
                "argoproj.io/Rollout".into(),
                ResourceOverride {
                    health_lua: "return hs".into(),
                },
            ),
        ]);
        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn file_at_group_level_fails() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        place(dir.path(), "resources/stray.lua", "oops")?;

        let result = collect_resource_overrides(dir.path());
        assert!(matches!(result, Err(OverrideError::NotADirectory(_))));

        Ok(())
    }

    #[test]
    fn file_sink_writes_config_map() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let sink = FileOverrideSink::new(
            "argocd-resource-override-cm",
            "argocd",
            dir.path().join("overrides.yaml"),
        );
        let overrides = ResourceOverrides::from([(
            "argoproj.io/Rollout".into(),
            ResourceOverride {
                health_lua: "return hs".into(),
            },
        )]);
        sink.push(&overrides)?;

        let result = std::fs::read_to_string(sink.path())?;
        let expect = indoc! {r#"
            apiVersion: v1
            kind: ConfigMap
            metadata:
              name: argocd-resource-override-cm
              namespace: argocd
              labels:
                app.kubernetes.io/part-of: argocd
            data:
              resources: |
                argoproj.io/Rollout:
                  health.lua: return hs
        "#};
        assert_eq!(result, expect);

        Ok(())
    }
}
