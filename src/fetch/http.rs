// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! HTTP getter.
//!
//! Downloads a URL into the destination directory. Tarballs (`.tar.gz`,
//! `.tgz`, `.tar`) are unpacked in place, anything else is saved as a single
//! file named after the last path segment of the URL.

use crate::fetch::{merge_checkout, FetchError, Result};

use flate2::read::GzDecoder;
use std::{io::Read, path::Path};
use tracing::{debug, instrument};
use url::Url;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum Payload {
    TarGz,
    Tar,
    File,
}

impl Payload {
    fn detect(url: &Url) -> Self {
        let path = url.path().to_lowercase();
        if path.ends_with(".tar.gz") || path.ends_with(".tgz") {
            Self::TarGz
        } else if path.ends_with(".tar") {
            Self::Tar
        } else {
            Self::File
        }
    }
}

/// Download URL into `dest`.
///
/// # Errors
///
/// - Return [`FetchError::Http`] if the request fails or does not succeed.
/// - Return [`FetchError::NoFileName`] if a plain file URL has no name.
/// - Return [`FetchError::Io`] if the payload cannot be written or unpacked.
#[instrument(skip(client), fields(url = %url), level = "debug")]
pub(crate) async fn fetch_http(client: &reqwest::Client, dest: &Path, url: &Url) -> Result<()> {
    let http_error = |source| FetchError::Http {
        url: url.to_string(),
        source,
    };

    let response = client
        .get(url.clone())
        .send()
        .await
        .and_then(|response| response.error_for_status())
        .map_err(http_error)?;
    let bytes = response.bytes().await.map_err(http_error)?;
    debug!("downloaded {} bytes", bytes.len());

    let payload = Payload::detect(url);
    let url = url.clone();
    let checkout = tokio::task::spawn_blocking(move || {
        let checkout = tempfile::tempdir().map_err(|source| FetchError::Io {
            source,
            path: std::env::temp_dir(),
        })?;
        store_payload(payload, &bytes, checkout.path(), &url)?;
        Ok::<_, FetchError>(checkout)
    })
    .await??;

    merge_checkout(checkout.path(), dest)?;
    Ok(())
}

fn store_payload(payload: Payload, bytes: &[u8], dest: &Path, url: &Url) -> Result<()> {
    match payload {
        Payload::TarGz => unpack(GzDecoder::new(bytes), dest),
        Payload::Tar => unpack(bytes, dest),
        Payload::File => {
            let name = url
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .filter(|name| !name.is_empty())
                .ok_or_else(|| FetchError::NoFileName(url.to_string()))?;
            let name = urlencoding::decode(name)
                .map(|name| name.into_owned())
                .unwrap_or_else(|_| name.to_string());

            // INVARIANT: Never let a decoded name escape the destination.
            let name = Path::new(&name)
                .file_name()
                .ok_or_else(|| FetchError::NoFileName(url.to_string()))?;
            let target = dest.join(name);
            std::fs::write(&target, bytes).map_err(|source| FetchError::Io {
                source,
                path: target.clone(),
            })
        }
    }
}

fn unpack(reader: impl Read, dest: &Path) -> Result<()> {
    tar::Archive::new(reader)
        .unpack(dest)
        .map_err(|source| FetchError::Io {
            source,
            path: dest.into(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{write::GzEncoder, Compression};
    use pretty_assertions::assert_eq;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn build_tarball(entries: &[(&str, &str)]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut archive = tar::Builder::new(encoder);

        for (file_path, content) in entries {
            let data = content.as_bytes();
            let mut header = tar::Header::new_gnu();
            header.set_path(file_path).unwrap();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_entry_type(tar::EntryType::Regular);
            header.set_cksum();
            archive.append(&header, data).unwrap();
        }

        archive.into_inner().unwrap().finish().unwrap()
    }

    #[tokio::test]
    async fn tarball_is_unpacked() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        let tarball = build_tarball(&[
            ("resources/apps/Rollout/health.lua", "return hs"),
            ("ui/extension.js", "console.log(1)"),
        ]);
        Mock::given(method("GET"))
            .and(path("/ext.tar.gz"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(tarball, "application/gzip"))
            .mount(&server)
            .await;

        let dest = tempfile::tempdir()?;
        let url = Url::parse(&format!("{}/ext.tar.gz", server.uri()))?;
        fetch_http(&reqwest::Client::new(), dest.path(), &url).await?;

        let result = std::fs::read_to_string(dest.path().join("resources/apps/Rollout/health.lua"))?;
        assert_eq!(result, "return hs");
        assert!(dest.path().join("ui/extension.js").is_file());

        Ok(())
    }

    #[tokio::test]
    async fn plain_file_is_saved_by_name() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dist/extension.js"))
            .respond_with(ResponseTemplate::new(200).set_body_string("console.log(1)"))
            .mount(&server)
            .await;

        let dest = tempfile::tempdir()?;
        let url = Url::parse(&format!("{}/dist/extension.js", server.uri()))?;
        fetch_http(&reqwest::Client::new(), dest.path(), &url).await?;

        let result = std::fs::read_to_string(dest.path().join("extension.js"))?;
        assert_eq!(result, "console.log(1)");

        Ok(())
    }

    #[tokio::test]
    async fn error_status_fails() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dest = tempfile::tempdir()?;
        let url = Url::parse(&format!("{}/missing.js", server.uri()))?;
        let result = fetch_http(&reqwest::Client::new(), dest.path(), &url).await;
        assert!(matches!(result, Err(FetchError::Http { .. })));

        Ok(())
    }
}
