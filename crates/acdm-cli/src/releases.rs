//! Release listing from the GitHub REST API.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;

pub const DEFAULT_API_URL: &str = "https://api.github.com";
const PAGE_SIZE: usize = 100;

/// One published release.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Release {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub prerelease: bool,
}

impl Release {
    /// Display title of the release; empty when it has none.
    pub fn title(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }
}

/// HTTP client for the releases of one repository.
pub struct GithubReleases {
    client: Client,
    api_url: String,
    token: Option<String>,
}

impl GithubReleases {
    pub fn new(api_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    /// All releases of `repository` (`owner/name`), following pagination.
    pub async fn list(&self, repository: &str) -> Result<Vec<Release>> {
        let url = format!("{}/repos/{}/releases", self.api_url, repository);
        let mut releases = Vec::new();

        for page in 1.. {
            let mut request = self
                .client
                .get(&url)
                .query(&[("per_page", PAGE_SIZE), ("page", page)])
                .header("User-Agent", "acdm-cli")
                .header("Accept", "application/vnd.github+json");
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }

            let response = request
                .send()
                .await
                .with_context(|| format!("Failed to list releases of {}", repository))?
                .error_for_status()
                .with_context(|| format!("Release listing of {} was rejected", repository))?;
            let batch: Vec<Release> = response
                .json()
                .await
                .context("Failed to parse release listing")?;

            let last_page = batch.len() < PAGE_SIZE;
            releases.extend(batch);
            if last_page {
                break;
            }
        }

        Ok(releases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_release_listing() {
        let body = r#"[
            {"name": "v1.4.0.3", "tag_name": "v1.4.0.3", "prerelease": true, "draft": false},
            {"name": null, "tag_name": "v1.3.0", "prerelease": false}
        ]"#;
        let releases: Vec<Release> = serde_json::from_str(body).unwrap();
        assert_eq!(releases.len(), 2);
        assert_eq!(releases[0].title(), "v1.4.0.3");
        assert!(releases[0].prerelease);
        assert_eq!(releases[1].title(), "");
        assert_eq!(
            releases[1],
            Release {
                name: None,
                prerelease: false,
            }
        );
    }

    #[test]
    fn api_url_drops_trailing_slash() {
        let releases = GithubReleases::new("https://example.test/", None);
        assert_eq!(releases.api_url, "https://example.test");
    }
}
