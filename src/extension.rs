// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Extension manifest layout.
//!
//! An __extension manifest__ is the declared intent that extsync acts upon.
//! It names the extension, lists the sources whose files should be
//! materialized under the shared output root, and carries the status that
//! the reconciler reports back. The manifest is never treated as state: the
//! durable state lives in the snapshot and tracker files under the output
//! root.
//!
//! # General Layout
//!
//! ```toml
//! [metadata]
//! name = "argo-rollouts"
//! namespace = "argocd"
//!
//! [spec]
//! baseDirectory = "resources"
//!
//! [[spec.sources]]
//! [spec.sources.git]
//! url = "https://github.com/argoproj-labs/rollout-extension.git"
//! revision = "main"
//! secretRef = { namespace = "argocd", name = "rollout-creds" }
//!
//! [[spec.sources]]
//! [spec.sources.web]
//! url = "https://example.org/extension.tar.gz"
//! ```

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    str::FromStr,
};

/// Directory inside a git source that is used when the manifest does not
/// name one.
pub const DEFAULT_BASE_DIRECTORY: &str = "resources";

/// Declared intent to materialize one or more remote sources.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Extension {
    /// Identity and lifecycle markers.
    pub metadata: ObjectMeta,

    /// Sources to synchronize.
    #[serde(default)]
    pub spec: ExtensionSpec,

    /// Last reported outcome.
    #[serde(default, skip_serializing_if = "ExtensionStatus::is_empty")]
    pub status: ExtensionStatus,
}

impl Extension {
    /// Construct new extension with no sources.
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta {
                name: ExtensionName::new(name),
                namespace: namespace.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Append a source to the extension.
    pub fn with_source(mut self, source: ExtensionSource) -> Self {
        self.spec.sources.push(source);
        self
    }

    /// Name of the extension.
    pub fn name(&self) -> &ExtensionName {
        &self.metadata.name
    }

    /// Directory inside each git source whose contents get placed.
    pub fn base_directory(&self) -> &str {
        match self.spec.base_directory.as_deref() {
            Some(dir) if !dir.is_empty() => dir,
            _ => DEFAULT_BASE_DIRECTORY,
        }
    }
}

impl FromStr for Extension {
    type Err = ManifestError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let extension: Self = toml::de::from_str(data)?;
        if !extension.name().is_valid() {
            return Err(ManifestError::InvalidName(extension.name().clone()));
        }

        Ok(extension)
    }
}

impl Display for Extension {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ManifestError::Serialize)?
                .as_str(),
        )
    }
}

/// Identity and lifecycle markers of an extension.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Name, unique within its namespace.
    pub name: ExtensionName,

    /// Namespace the extension lives in.
    #[serde(default)]
    pub namespace: String,

    /// Finalizers that must be cleared before the extension may vanish.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,

    /// Extension has been marked for removal.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deletion_requested: bool,
}

impl ObjectMeta {
    /// Check if finalizer is present.
    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|entry| entry == finalizer)
    }

    /// Add finalizer if absent. Returns true if the finalizer was added.
    pub fn add_finalizer(&mut self, finalizer: &str) -> bool {
        if self.has_finalizer(finalizer) {
            return false;
        }

        self.finalizers.push(finalizer.into());
        true
    }

    /// Remove every copy of finalizer. Returns true if anything was removed.
    pub fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let before = self.finalizers.len();
        self.finalizers.retain(|entry| entry != finalizer);
        before != self.finalizers.len()
    }
}

/// Name of an extension.
///
/// Doubles as the owner recorded in the file tracker.
#[derive(Default, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ExtensionName(String);

impl ExtensionName {
    /// Construct new extension name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Treat name as string slice.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Check if name can serve as a single file name component.
    ///
    /// Snapshot files are named after the extension, so separators and
    /// relative components are rejected.
    pub fn is_valid(&self) -> bool {
        !matches!(self.as_str(), "" | "." | "..")
            && !self.0.contains(['/', '\\', '\0'])
    }
}

impl Display for ExtensionName {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_str())
    }
}

impl From<&str> for ExtensionName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Namespace plus name pointer to an object extsync does not own.
#[derive(Default, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Deserialize, Serialize)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl Display for NamespacedName {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{}/{}", self.namespace, self.name)
    }
}

/// Sources and placement options of an extension.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionSpec {
    /// Ordered listing of sources.
    #[serde(default)]
    pub sources: Vec<ExtensionSource>,

    /// Directory inside git sources to place, defaults to "resources".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_directory: Option<String>,
}

/// One origin contributing files to an extension.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionSource {
    /// Git repository pinned to a revision.
    Git(GitSource),

    /// Plain web URL.
    Web(WebSource),
}

impl ExtensionSource {
    /// URL of the source regardless of variant.
    pub fn url(&self) -> &str {
        match self {
            Self::Git(git) => git.url.as_str(),
            Self::Web(web) => web.url.as_str(),
        }
    }
}

/// Git repository source.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GitSource {
    /// Repository URL (`ssh://`, `http://`, `https://`, or `file://`).
    pub url: String,

    /// Branch, tag, commit SHA, or empty for the remote's HEAD.
    #[serde(default)]
    pub revision: String,

    /// Secret holding transport credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<NamespacedName>,
}

/// Plain web source.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct WebSource {
    pub url: String,
}

/// Outcome reported back onto the manifest.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct ExtensionStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl ExtensionStatus {
    fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Current ready condition if reported.
    pub fn ready(&self) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|condition| condition.kind == ConditionKind::Ready)
    }

    /// Replace the ready condition.
    ///
    /// INVARIANT: At most one ready condition exists at any time.
    pub fn set_ready(&mut self, status: ConditionStatus, message: impl Into<String>) {
        self.conditions
            .retain(|condition| condition.kind != ConditionKind::Ready);
        self.conditions.push(Condition {
            kind: ConditionKind::Ready,
            status,
            message: message.into(),
        });
    }
}

/// Single status condition.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub kind: ConditionKind,
    pub status: ConditionStatus,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Deserialize, Serialize)]
pub enum ConditionKind {
    Ready,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Deserialize, Serialize)]
pub enum ConditionStatus {
    True,
    False,
}

/// Extension manifest error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ManifestError {
    /// Failed to deserialize manifest.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize manifest.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Extension name cannot be used as a file name.
    #[error("invalid extension name {:?}", .0.as_str())]
    InvalidName(ExtensionName),
}

impl From<ManifestError> for FmtError {
    fn from(_: ManifestError) -> Self {
        FmtError
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    #[test]
    fn deserialize_extension_manifest() -> anyhow::Result<()> {
        let result: Extension = indoc! {r#"
            [metadata]
            name = "rollouts"
            namespace = "argocd"

            [spec]
            baseDirectory = "health"

            [[spec.sources]]
            [spec.sources.git]
            url = "https://git.example.org/rollouts.git"
            revision = "main"
            secretRef = { namespace = "argocd", name = "rollouts-creds" }

            [[spec.sources]]
            [spec.sources.web]
            url = "https://example.org/ui.tar.gz"
        "#}
        .parse()?;

        let expect = Extension::new("rollouts", "argocd")
            .with_source(ExtensionSource::Git(GitSource {
                url: "https://git.example.org/rollouts.git".into(),
                revision: "main".into(),
                secret_ref: Some(NamespacedName::new("argocd", "rollouts-creds")),
            }))
            .with_source(ExtensionSource::Web(WebSource {
                url: "https://example.org/ui.tar.gz".into(),
            }));
        let expect = Extension {
            spec: ExtensionSpec {
                base_directory: Some("health".into()),
                ..expect.spec
            },
            ..expect
        };

        assert_eq!(result, expect);
        assert_eq!(result.base_directory(), "health");

        Ok(())
    }

    #[test_case("rollouts", true; "plain")]
    #[test_case("argo.rollouts-v2", true; "dots and dashes")]
    #[test_case("", false; "empty")]
    #[test_case("..", false; "parent")]
    #[test_case("team/rollouts", false; "slash")]
    #[test_case("team\\rollouts", false; "backslash")]
    #[test]
    fn extension_name_validity(name: &str, expect: bool) {
        use pretty_assertions::assert_eq;
        assert_eq!(ExtensionName::new(name).is_valid(), expect);
    }

    #[test]
    fn manifest_with_path_in_name_fails() {
        let result = indoc! {r#"
            [metadata]
            name = "../rollouts"
            namespace = "argocd"
        "#}
        .parse::<Extension>();
        assert!(matches!(result, Err(ManifestError::InvalidName(_))));
    }

    #[test]
    fn serialized_manifest_parses_back() -> anyhow::Result<()> {
        let mut extension = Extension::new("rollouts", "argocd").with_source(
            ExtensionSource::Git(GitSource {
                url: "ssh://git@git.example.org/rollouts.git".into(),
                revision: String::new(),
                secret_ref: None,
            }),
        );
        extension.metadata.add_finalizer("extensions-finalizer.extsync.io");
        extension
            .status
            .set_ready(ConditionStatus::True, "Successfully processed 1 extension sources");

        let result: Extension = extension.to_string().parse()?;
        assert_eq!(result, extension);
        assert_eq!(result.base_directory(), DEFAULT_BASE_DIRECTORY);

        Ok(())
    }

    #[test]
    fn set_ready_replaces_previous_condition() {
        let mut status = ExtensionStatus::default();
        status.set_ready(ConditionStatus::False, "boom");
        status.set_ready(ConditionStatus::True, "fine");

        assert_eq!(status.conditions.len(), 1);
        assert_eq!(
            status.ready(),
            Some(&Condition {
                kind: ConditionKind::Ready,
                status: ConditionStatus::True,
                message: "fine".into(),
            })
        );
    }

    #[test]
    fn finalizer_bookkeeping() {
        let mut meta = ObjectMeta::default();
        assert!(meta.add_finalizer("a"));
        assert!(!meta.add_finalizer("a"));
        assert!(meta.has_finalizer("a"));
        assert!(meta.remove_finalizer("a"));
        assert!(!meta.remove_finalizer("a"));
        assert!(meta.finalizers.is_empty());
    }
}
