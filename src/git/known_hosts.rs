// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! OpenSSH known-hosts store.
//!
//! Only the subset of the format needed to validate a host key is
//! understood: comma separated host patterns (with `*` and `?` wildcards,
//! `!` negation, and the `[host]:port` form), the key type, and the base64
//! key blob. Hashed host entries and `@cert-authority`/`@revoked` markers are
//! skipped.
//!
//! # See Also
//!
//! - [sshd(8) - SSH_KNOWN_HOSTS FILE FORMAT](https://man.openbsd.org/sshd.8#SSH_KNOWN_HOSTS_FILE_FORMAT)

use base64::{engine::general_purpose::STANDARD, Engine as _};
use glob::Pattern;
use std::{
    path::{Path, PathBuf},
    str::FromStr,
};

/// Parsed known-hosts store.
#[derive(Default, Debug, Clone)]
pub struct KnownHosts {
    entries: Vec<KnownHost>,
}

#[derive(Debug, Clone)]
struct KnownHost {
    patterns: Vec<HostPattern>,
    key: Vec<u8>,
}

#[derive(Debug, Clone)]
struct HostPattern {
    negated: bool,
    pattern: Pattern,
}

/// Outcome of a host key lookup.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum HostKeyStatus {
    /// Host is listed with this exact key.
    Match,

    /// Host is listed, but only with other keys.
    Mismatch,

    /// Host is not listed at all.
    Unknown,
}

impl KnownHosts {
    /// Load known-hosts store from file.
    ///
    /// # Errors
    ///
    /// - Return [`KnownHostsError`] if file cannot be read.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, KnownHostsError> {
        let path = path.as_ref();
        std::fs::read_to_string(path)
            .map(|data| data.parse().unwrap_or_default())
            .map_err(|source| KnownHostsError {
                source,
                path: path.into(),
            })
    }

    /// Check a raw host key blob against the store.
    ///
    /// Ports other than 22 are looked up in `[host]:port` form.
    pub fn check(&self, host: &str, port: Option<u16>, key: &[u8]) -> HostKeyStatus {
        let candidate = match port {
            Some(port) if port != 22 => format!("[{}]:{port}", host.to_lowercase()),
            _ => host.to_lowercase(),
        };

        let mut status = HostKeyStatus::Unknown;
        for entry in self.entries.iter().filter(|entry| entry.matches(&candidate)) {
            if entry.key == key {
                return HostKeyStatus::Match;
            }
            status = HostKeyStatus::Mismatch;
        }

        status
    }

    /// Number of usable entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromStr for KnownHosts {
    type Err = std::convert::Infallible;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let entries = data.lines().filter_map(KnownHost::parse).collect();
        Ok(Self { entries })
    }
}

impl KnownHost {
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('@') {
            return None;
        }

        let mut fields = line.split_whitespace();
        let hosts = fields.next()?;
        let _key_type = fields.next()?;
        let key = STANDARD.decode(fields.next()?).ok()?;

        // INVARIANT: Hashed hosts cannot be matched without HMAC support, skip them.
        if hosts.starts_with('|') {
            return None;
        }

        let patterns = hosts
            .split(',')
            .filter(|host| !host.is_empty())
            .map(HostPattern::parse)
            .collect::<Option<Vec<_>>>()?;

        Some(Self { patterns, key })
    }

    fn matches(&self, candidate: &str) -> bool {
        let mut matched = false;
        for pattern in &self.patterns {
            if pattern.pattern.matches(candidate) {
                if pattern.negated {
                    return false;
                }
                matched = true;
            }
        }

        matched
    }
}

impl HostPattern {
    fn parse(host: &str) -> Option<Self> {
        let (negated, host) = match host.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, host),
        };

        // INVARIANT: Brackets are literal in known-hosts, only '*' and '?' are wildcards.
        let mut escaped = String::with_capacity(host.len());
        for c in host.to_lowercase().chars() {
            match c {
                '[' => escaped.push_str("[[]"),
                ']' => escaped.push_str("[]]"),
                _ => escaped.push(c),
            }
        }

        Pattern::new(&escaped)
            .ok()
            .map(|pattern| Self { negated, pattern })
    }
}

/// Known-hosts store cannot be read.
#[derive(Debug, thiserror::Error)]
#[error("failed to read known hosts at {:?}", path.display())]
pub struct KnownHostsError {
    #[source]
    source: std::io::Error,
    path: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    // "hello" and "world" as base64 blobs.
    const STORE: &str = indoc! {r#"
        # comment
        github.com,140.82.112.3 ssh-ed25519 aGVsbG8=
        *.example.org,!evil.example.org ssh-rsa aGVsbG8=
        [git.example.org]:2222 ssh-ed25519 d29ybGQ=
        |1|c2FsdA==|aGFzaA== ssh-ed25519 aGVsbG8=
        @revoked bad.example.org ssh-ed25519 aGVsbG8=
    "#};

    #[test_case("github.com", None, b"hello", HostKeyStatus::Match; "plain host")]
    #[test_case("GitHub.com", Some(22), b"hello", HostKeyStatus::Match; "default port")]
    #[test_case("github.com", None, b"world", HostKeyStatus::Mismatch; "wrong key")]
    #[test_case("ci.example.org", None, b"hello", HostKeyStatus::Match; "wildcard")]
    #[test_case("evil.example.org", None, b"hello", HostKeyStatus::Unknown; "negated")]
    #[test_case("git.example.org", Some(2222), b"world", HostKeyStatus::Match; "custom port")]
    #[test_case("git.example.org", None, b"world", HostKeyStatus::Unknown; "port required")]
    #[test_case("bad.example.org", None, b"hello", HostKeyStatus::Unknown; "markers skipped")]
    #[test]
    fn check_host_key(host: &str, port: Option<u16>, key: &[u8], expect: HostKeyStatus) {
        let store: KnownHosts = STORE.parse().unwrap_or_default();
        use pretty_assertions::assert_eq;
        assert_eq!(store.check(host, port, key), expect);
    }

    #[test]
    fn hashed_and_marker_lines_skipped() {
        let store: KnownHosts = STORE.parse().unwrap_or_default();
        assert_eq!(store.len(), 3);
    }
}
