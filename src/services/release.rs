//! Release versions and the remote source they are listed from.

use crate::{
    config::UpdateConfig,
    http_client::{FetchError, handle_http_response, https_client},
};
use anyhow::{Context, Result, anyhow, ensure};
use log::{debug, info, warn};
#[cfg(any(test, feature = "mock"))]
use mockall::automock;
use reqwest::{Client, header::ACCEPT};
use serde::Deserialize;
use std::{cmp::Ordering, fmt, str::FromStr};
use trait_variant::make;

/// A release tag such as `V3.10.0`.
///
/// Ordering is a numeric comparison of the dotted components, so
/// `V3.2.1 < V3.10.0`. The letter prefix is kept for display and download but
/// does not take part in comparisons.
#[derive(Clone, Debug)]
pub struct ReleaseVersion {
    tag: String,
    parts: Vec<u64>,
}

impl ReleaseVersion {
    /// The version of the running binary.
    pub fn current() -> Self {
        match semver::Version::parse(env!("CARGO_PKG_VERSION")) {
            Ok(version) => Self::from(&version),
            Err(_) => Self {
                tag: concat!("V", env!("CARGO_PKG_VERSION")).to_string(),
                parts: Vec::new(),
            },
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }
}

impl FromStr for ReleaseVersion {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let tag = s.trim();
        let numeric = tag.trim_start_matches(|c: char| c.is_ascii_alphabetic());
        ensure!(!numeric.is_empty(), "no version number in tag {tag:?}");

        let parts = numeric
            .split('.')
            .map(|p| p.parse::<u64>().context(format!("invalid component in tag {tag:?}")))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            tag: tag.to_string(),
            parts,
        })
    }
}

impl From<&semver::Version> for ReleaseVersion {
    fn from(version: &semver::Version) -> Self {
        Self {
            tag: format!("V{}.{}.{}", version.major, version.minor, version.patch),
            parts: vec![version.major, version.minor, version.patch],
        }
    }
}

impl PartialEq for ReleaseVersion {
    fn eq(&self, other: &Self) -> bool {
        self.parts == other.parts
    }
}

impl Eq for ReleaseVersion {}

impl PartialOrd for ReleaseVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReleaseVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parts.cmp(&other.parts)
    }
}

impl fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UpdateDirection {
    Upgrade,
    Downgrade,
}

/// Result of asking the release source for versions
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CheckOutcome {
    /// Versions in source order, never empty
    Available(Vec<ReleaseVersion>),
    /// The source was unreachable or listed nothing usable
    NoVersions,
    RateLimited,
}

/// Why an update did not complete
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UpdateFailure {
    NoVersions,
    RateLimited,
    Download,
    CorruptArchive,
    Install,
}

impl UpdateFailure {
    /// Text shown on the panel
    pub fn message(self) -> &'static str {
        match self {
            UpdateFailure::NoVersions => "NO VERSIONS FOUND",
            UpdateFailure::RateLimited => "RATE LIMITED",
            UpdateFailure::Download => "DOWNLOAD FAILED",
            UpdateFailure::CorruptArchive => "BAD RELEASE FILE",
            UpdateFailure::Install => "UPDATE FAILED",
        }
    }
}

impl fmt::Display for UpdateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Up to three versions newer (or older) than `current`, in source order.
pub fn select_candidates(
    direction: UpdateDirection,
    current: &ReleaseVersion,
    versions: &[ReleaseVersion],
) -> Vec<ReleaseVersion> {
    versions
        .iter()
        .filter(|v| match direction {
            UpdateDirection::Upgrade => *v > current,
            UpdateDirection::Downgrade => *v < current,
        })
        .take(3)
        .cloned()
        .collect()
}

/// Parse tags into versions, skipping tags that are not version numbers.
pub fn parse_tags(tags: &[String]) -> Vec<ReleaseVersion> {
    tags.iter()
        .filter_map(|tag| match tag.parse::<ReleaseVersion>() {
            Ok(version) => Some(version),
            Err(e) => {
                debug!("skip tag: {e:#}");
                None
            }
        })
        .collect()
}

#[make(Send)]
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait ReleaseSource {
    /// Tag names, newest first
    async fn list_tags(&self) -> Result<Vec<String>, FetchError>;
    /// Raw release archive of `tag`
    async fn download(&self, tag: String) -> Result<Vec<u8>, FetchError>;
}

#[derive(Deserialize)]
struct Tag {
    name: String,
}

/// Release source backed by the GitHub tags API and tag archives
#[derive(Clone)]
pub struct GithubReleaseSource {
    client: Client,
    tags_url: String,
    archive_url_template: String,
    repository: String,
}

impl GithubReleaseSource {
    pub fn new(config: &UpdateConfig) -> Result<Self> {
        ensure!(
            config.repository.split('/').count() == 2,
            "release repository must be owner/name: {}",
            config.repository
        );

        Ok(Self {
            client: https_client(config.http_timeout)?,
            tags_url: format!(
                "{}/repos/{}/tags?per_page=100",
                config.api_base.trim_end_matches('/'),
                config.repository
            ),
            archive_url_template: config.archive_url_template.clone(),
            repository: config.repository.clone(),
        })
    }

    fn archive_url(&self, tag: &str) -> String {
        self.archive_url_template
            .replace("{repository}", &self.repository)
            .replace("{tag}", tag)
    }
}

impl ReleaseSource for GithubReleaseSource {
    async fn list_tags(&self) -> Result<Vec<String>, FetchError> {
        info!("list release tags from {}", self.tags_url);

        let res = self
            .client
            .get(&self.tags_url)
            .header(ACCEPT, "application/vnd.github+json")
            .send()
            .await?;
        let body = handle_http_response(res, "tag listing").await?;
        let tags: Vec<Tag> = serde_json::from_slice(&body)
            .map_err(|e| FetchError::Failed(anyhow!(e).context("failed to parse tag listing")))?;

        Ok(tags.into_iter().map(|t| t.name).collect())
    }

    async fn download(&self, tag: String) -> Result<Vec<u8>, FetchError> {
        let url = self.archive_url(&tag);
        info!("download release {tag} from {url}");

        let res = self.client.get(&url).send().await?;
        let archive = handle_http_response(res, "release download").await?;

        if archive.is_empty() {
            warn!("release {tag} downloaded empty");
        }
        Ok(archive)
    }
}
