//! Build version derivation for CI.
//!
//! The project version lives in `CMakeLists.txt`. Builds from the `develop`
//! branch get a `-dev.N` suffix, where `N` is one above the highest existing
//! pre-release for the same major and minor version.

use std::future::Future;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::releases::Release;

pub const DEV_BRANCH: &str = "develop";

#[derive(Debug, Error)]
pub enum VersionError {
    #[error("Could not find version in CMakeLists.txt")]
    VersionNotFound,
    #[error("Could not read {path}: {message}")]
    Read { path: String, message: String },
    #[error("Invalid ref {0}, expected refs/heads/<branch>")]
    InvalidRef(String),
    #[error("Invalid semantic version format: {0}")]
    InvalidVersion(String),
    #[error("Release lookup failed: {0}")]
    Lookup(String),
}

fn cmake_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"PROJECT\(.*?VERSION\s+"(\d+\.\d+\.\d+)""#).expect("valid cmake pattern")
    })
}

fn semver_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^v?(\d+)\.(\d+)\.(\d+)").expect("valid semver pattern"))
}

fn ref_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^refs/heads/(.*)").expect("valid ref pattern"))
}

/// Find the version declared by the `PROJECT(...)` call of a CMake file.
pub fn extract_cmake_version(contents: &str) -> Result<String, VersionError> {
    cmake_pattern()
        .captures(contents)
        .and_then(|captures| captures.get(1))
        .map(|version| version.as_str().to_string())
        .ok_or(VersionError::VersionNotFound)
}

pub fn read_cmake_version(path: impl AsRef<Path>) -> Result<String, VersionError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|err| VersionError::Read {
        path: path.display().to_string(),
        message: err.to_string(),
    })?;
    extract_cmake_version(&contents)
}

/// Parse `MAJOR.MINOR.PATCH` with an optional leading `v`.
pub fn parse_semantic_version(version: &str) -> Option<(u64, u64, u64)> {
    let captures = semver_pattern().captures(version)?;
    let part = |index: usize| captures.get(index)?.as_str().parse::<u64>().ok();
    Some((part(1)?, part(2)?, part(3)?))
}

/// Branch name of a `refs/heads/<branch>` reference.
pub fn branch_name(reference: &str) -> Result<&str, VersionError> {
    ref_pattern()
        .captures(reference)
        .and_then(|captures| captures.get(1))
        .map(|branch| branch.as_str())
        .ok_or_else(|| VersionError::InvalidRef(reference.to_string()))
}

/// Highest dev counter among pre-releases titled `v{major}.{minor}...`.
///
/// The counter is the last dot-separated segment of the title. Titles whose
/// last segment is not a number are ignored. No match yields 0.
pub fn highest_dev_release(releases: &[Release], major: u64, minor: u64) -> u64 {
    let prefix = format!("v{}.{}", major, minor);
    releases
        .iter()
        .filter(|release| release.prerelease && release.title().starts_with(&prefix))
        .filter_map(|release| release.title().rsplit('.').next()?.parse::<u64>().ok())
        .max()
        .unwrap_or(0)
}

/// Highest existing dev counter for `version`.
///
/// Version `"0"` short-circuits to 0 without calling `lookup`.
pub async fn determine_dev_release<F, Fut>(version: &str, lookup: F) -> Result<u64, VersionError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<Vec<Release>>>,
{
    if version == "0" {
        return Ok(0);
    }
    let (major, minor, _) = parse_semantic_version(version)
        .ok_or_else(|| VersionError::InvalidVersion(version.to_string()))?;
    let releases = lookup()
        .await
        .map_err(|err| VersionError::Lookup(format!("{:#}", err)))?;
    Ok(highest_dev_release(&releases, major, minor))
}

/// Version written to the CI environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionOutput {
    pub version: String,
    pub dev_release: Option<u64>,
}

impl VersionOutput {
    /// Release build: the plain project version.
    pub fn release(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            dev_release: None,
        }
    }

    /// Development build following the highest existing dev counter.
    pub fn development(version: &str, last_dev_release: u64) -> Self {
        let dev_release = last_dev_release + 1;
        Self {
            version: format!("{}-dev.{}", version, dev_release),
            dev_release: Some(dev_release),
        }
    }

    /// Lines appended to the environment file.
    pub fn env_lines(&self) -> String {
        let mut lines = format!("VERSION={}\n", self.version);
        if let Some(dev_release) = self.dev_release {
            lines.push_str(&format!("DEV_RELEASE={}\n", dev_release));
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn release(title: &str, prerelease: bool) -> Release {
        Release {
            name: Some(title.to_string()),
            prerelease,
        }
    }

    #[test]
    fn extracts_project_version() {
        assert_eq!(
            extract_cmake_version(r#"PROJECT(Foo VERSION "1.2.3")"#).unwrap(),
            "1.2.3"
        );
        let cmake = "cmake_minimum_required(VERSION 3.14)\nPROJECT(vACDM VERSION \"2.0.1\" LANGUAGES CXX)\n";
        assert_eq!(extract_cmake_version(cmake).unwrap(), "2.0.1");
    }

    #[test]
    fn missing_version_is_an_error() {
        assert!(matches!(
            extract_cmake_version("project(Foo)\nset(VERSION \"1.2.3\")"),
            Err(VersionError::VersionNotFound)
        ));
        assert!(matches!(
            extract_cmake_version(r#"PROJECT(Foo VERSION "1.2")"#),
            Err(VersionError::VersionNotFound)
        ));
    }

    #[test]
    fn parses_semantic_versions() {
        assert_eq!(parse_semantic_version("1.4.0"), Some((1, 4, 0)));
        assert_eq!(parse_semantic_version("v2.3.0.5"), Some((2, 3, 0)));
        assert_eq!(parse_semantic_version("release-1.0.0"), None);
        assert_eq!(parse_semantic_version("1.0"), None);
    }

    #[test]
    fn branch_requires_heads_prefix() {
        assert_eq!(branch_name("refs/heads/develop").unwrap(), "develop");
        assert_eq!(branch_name("refs/heads/feature/x").unwrap(), "feature/x");
        assert!(matches!(
            branch_name("refs/tags/v1.0.0"),
            Err(VersionError::InvalidRef(_))
        ));
    }

    #[test]
    fn highest_dev_release_filters_prereleases() {
        let releases = vec![
            release("v2.3.0.5", true),
            release("v2.3.0.7", true),
            release("v2.3.0.2", true),
            release("v2.3.0.9", false),
            release("v2.4.0.12", true),
            release("v2.3.0-beta", true),
        ];
        assert_eq!(highest_dev_release(&releases, 2, 3), 7);
        assert_eq!(highest_dev_release(&releases, 1, 0), 0);
        assert_eq!(highest_dev_release(&[], 2, 3), 0);
    }

    #[tokio::test]
    async fn zero_version_skips_lookup() {
        let called = AtomicBool::new(false);
        let result = determine_dev_release("0", || async {
            called.store(true, Ordering::SeqCst);
            Ok::<_, anyhow::Error>(Vec::new())
        })
        .await
        .unwrap();
        assert_eq!(result, 0);
        assert!(!called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn dev_release_uses_lookup() {
        let result = determine_dev_release("2.3.0", || async {
            Ok::<_, anyhow::Error>(vec![release("v2.3.0.5", true), release("v2.3.0.7", true)])
        })
        .await
        .unwrap();
        assert_eq!(result, 7);

        let invalid = determine_dev_release("next", || async { Ok::<_, anyhow::Error>(Vec::new()) }).await;
        assert!(matches!(invalid, Err(VersionError::InvalidVersion(_))));
    }

    #[test]
    fn develop_builds_bump_the_counter() {
        let output = VersionOutput::development("1.0.0", 3);
        assert_eq!(output.version, "1.0.0-dev.4");
        assert_eq!(output.dev_release, Some(4));
        assert_eq!(output.env_lines(), "VERSION=1.0.0-dev.4\nDEV_RELEASE=4\n");

        assert_eq!(VersionOutput::release("1.0.0").env_lines(), "VERSION=1.0.0\n");
    }
}
