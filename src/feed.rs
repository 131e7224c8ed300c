use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, CACHE_CONTROL, ETAG, IF_NONE_MATCH, PRAGMA, USER_AGENT};
use reqwest::StatusCode;
use serde::Deserialize;

use crate::logging::debug_log;

pub const DEFAULT_RELEASES_URL: &str =
    "https://api.github.com/repos/ButterScans/Manga-PayWall-Downloader/releases/latest";
pub const DEFAULT_RELEASE_PAGE: &str =
    "https://github.com/ButterScans/Manga-PayWall-Downloader/releases";

const ACCEPT_GITHUB_V3: &str = "application/vnd.github.v3+json";
const ERROR_BODY_LIMIT: usize = 200;

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("HTTP {status} {reason} | {body}")]
    Status {
        status: u16,
        reason: String,
        body: String,
    },
    #[error("release feed request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("release feed returned invalid JSON: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseInfo {
    pub tag: Option<String>,
    pub display_name: Option<String>,
    pub notes: Option<String>,
    pub url: Option<String>,
    pub etag: Option<String>,
}

impl ReleaseInfo {
    /// `tag_name`, falling back to the display name.
    pub fn usable_tag(&self) -> Option<&str> {
        [self.tag.as_deref(), self.display_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|value| !value.is_empty())
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes
            .as_deref()
            .filter(|body| !body.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedResponse {
    NotModified,
    Release(ReleaseInfo),
}

pub trait ReleaseFeed: Send + Sync {
    fn fetch_latest(&self, previous_etag: Option<&str>) -> Result<FeedResponse, FeedError>;
}

#[derive(Deserialize)]
struct Release {
    #[serde(default)]
    tag_name: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    html_url: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub url: String,
    pub user_agent: String,
    pub timeout: Option<Duration>,
    pub http_client: Option<Client>,
}

pub struct GithubFeed {
    http: Client,
    url: String,
    user_agent: String,
}

impl GithubFeed {
    pub fn new(config: ClientConfig) -> anyhow::Result<Self> {
        anyhow::ensure!(!config.url.trim().is_empty(), "feed: release url required");
        url::Url::parse(&config.url)
            .map_err(|err| anyhow::anyhow!("feed: invalid release url {:?}: {err}", config.url))?;

        let http = match config.http_client {
            Some(client) => client,
            None => Client::builder()
                .timeout(config.timeout.unwrap_or(Duration::from_secs(10)))
                .build()?,
        };
        let user_agent = if config.user_agent.trim().is_empty() {
            format!("pagesaver/{} (update-check)", crate::VERSION)
        } else {
            config.user_agent
        };

        Ok(Self {
            http,
            url: config.url,
            user_agent,
        })
    }
}

impl ReleaseFeed for GithubFeed {
    fn fetch_latest(&self, previous_etag: Option<&str>) -> Result<FeedResponse, FeedError> {
        debug_log(
            "feed",
            format!(
                "requesting {}{}",
                self.url,
                if previous_etag.is_some() { " (with etag)" } else { "" }
            ),
        );

        let mut request = self
            .http
            .get(&self.url)
            .header(ACCEPT, ACCEPT_GITHUB_V3)
            .header(USER_AGENT, &self.user_agent)
            .header(CACHE_CONTROL, "no-cache")
            .header(PRAGMA, "no-cache");
        if let Some(etag) = previous_etag {
            request = request.header(IF_NONE_MATCH, etag);
        }
        let response = request.send()?;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            debug_log("feed", "304 Not Modified");
            return Ok(FeedResponse::NotModified);
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(FeedError::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or_default().to_string(),
                body: body.chars().take(ERROR_BODY_LIMIT).collect(),
            });
        }

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());
        let raw = response.text()?;
        let release: Release = serde_json::from_str(&raw)?;

        let info = ReleaseInfo {
            tag: release.tag_name,
            display_name: release.name,
            notes: release.body,
            url: release.html_url,
            etag,
        };
        debug_log(
            "feed",
            format!(
                "received {} etag={}",
                info.usable_tag().unwrap_or("(no tag)"),
                info.etag.as_deref().unwrap_or("-")
            ),
        );
        Ok(FeedResponse::Release(info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usable_tag_prefers_tag_name() {
        let info = ReleaseInfo {
            tag: Some(" v1.2.0 ".into()),
            display_name: Some("Summer release".into()),
            ..ReleaseInfo::default()
        };
        assert_eq!(info.usable_tag(), Some("v1.2.0"));
    }

    #[test]
    fn usable_tag_falls_back_to_name() {
        let info = ReleaseInfo {
            tag: Some("  ".into()),
            display_name: Some("1.5.0".into()),
            ..ReleaseInfo::default()
        };
        assert_eq!(info.usable_tag(), Some("1.5.0"));
        assert_eq!(ReleaseInfo::default().usable_tag(), None);
    }

    #[test]
    fn rejects_invalid_url() {
        let result = GithubFeed::new(ClientConfig {
            url: "not a url".into(),
            ..ClientConfig::default()
        });
        assert!(result.is_err());
    }
}
