//! Remote leaderboard client
//!
//! Thin blocking HTTPS wrapper over the two leaderboard endpoints. The
//! client exposes the error taxonomy the submission manager's retry policy
//! is written against: 429 is rate limiting, 5xx and transport failures are
//! retryable, any other 4xx is a terminal rejection. Unknown response fields
//! are ignored.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One entry of the remote top list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopEntry {
    pub seed: u64,
    pub score: f64,
    #[serde(default)]
    pub rank: Option<u32>,
    #[serde(default)]
    pub discoverer_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TopResponse {
    images: Vec<TopEntry>,
}

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    seed: u64,
    score: f64,
    client_version: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    profile: Option<&'a str>,
}

/// Outcome of a `/submit` call that reached the server and parsed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubmitReply {
    pub accepted: bool,
    #[serde(default)]
    pub rank: Option<u32>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("rate limited by server")]
    RateLimited,

    #[error("server error: http {status}")]
    Server { status: u16 },

    #[error("rejected: http {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ApiError::RateLimited)
    }

    /// Worth retrying with backoff: the server errored or never answered.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Server { .. } | ApiError::Transport(_))
    }
}

/// Abstraction over the leaderboard endpoints, so the submission manager can
/// be driven by a scripted server in tests.
pub trait ScoreApi: Send + Sync {
    fn fetch_top(&self, limit: usize) -> Result<Vec<TopEntry>, ApiError>;

    fn submit_score(&self, seed: u64, score: f64) -> Result<SubmitReply, ApiError>;
}

/// Short build hash for the User-Agent: 12 hex chars or "unknown".
/// Overridable through `GIT_COMMIT` or `GITHUB_SHA`.
pub fn build_hash() -> String {
    for var in ["GIT_COMMIT", "GITHUB_SHA"] {
        if let Ok(value) = std::env::var(var) {
            let value = value.trim().to_ascii_lowercase();
            if value.len() >= 12 && value.chars().all(|c| c.is_ascii_hexdigit()) {
                return value[..12].to_string();
            }
        }
    }
    "unknown".to_string()
}

/// Whether the (external) update checker is disabled for this process.
pub fn update_check_disabled() -> bool {
    std::env::var("SEEDHUNT_NO_UPDATE_CHECK").map(|v| v == "1").unwrap_or(false)
}

/// Blocking HTTPS client for the leaderboard.
pub struct LeaderboardClient {
    http: reqwest::blocking::Client,
    base_url: String,
}

impl LeaderboardClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        let user_agent = format!(
            "seedhunt/{} ({})",
            env!("CARGO_PKG_VERSION"),
            build_hash()
        );
        let http = reqwest::blocking::Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Ok(Self { http, base_url })
    }
}

impl ScoreApi for LeaderboardClient {
    fn fetch_top(&self, limit: usize) -> Result<Vec<TopEntry>, ApiError> {
        let url = format!("{}/top?limit={}&unique=true", self.base_url, limit);
        let response = self
            .http
            .get(&url)
            .send()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ApiError::RateLimited);
        }
        if status.is_server_error() {
            return Err(ApiError::Server {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(ApiError::Rejected {
                status: status.as_u16(),
                message: response.text().unwrap_or_default(),
            });
        }
        let top: TopResponse = response
            .json()
            .map_err(|e| ApiError::Decode(e.to_string()))?;
        Ok(top.images)
    }

    fn submit_score(&self, seed: u64, score: f64) -> Result<SubmitReply, ApiError> {
        let url = format!("{}/submit", self.base_url);
        let body = SubmitRequest {
            seed,
            score,
            client_version: env!("CARGO_PKG_VERSION"),
            profile: None,
        };
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ApiError::RateLimited);
        }
        if status.is_server_error() {
            return Err(ApiError::Server {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(ApiError::Rejected {
                status: status.as_u16(),
                message: response.text().unwrap_or_default(),
            });
        }
        response.json().map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_taxonomy() {
        assert!(ApiError::RateLimited.is_rate_limited());
        assert!(!ApiError::RateLimited.is_retryable());
        assert!(ApiError::Server { status: 503 }.is_retryable());
        assert!(ApiError::Transport("timeout".into()).is_retryable());
        assert!(!ApiError::Rejected { status: 400, message: String::new() }.is_retryable());
    }

    #[test]
    fn test_top_entry_ignores_unknown_fields() {
        let json = r#"{
            "images": [
                { "seed": 42, "score": 1.5, "rank": 3, "extra_field": "ignored" },
                { "seed": 7, "score": 0.5 }
            ]
        }"#;
        let top: TopResponse = serde_json::from_str(json).unwrap();
        assert_eq!(top.images.len(), 2);
        assert_eq!(top.images[0].rank, Some(3));
        assert_eq!(top.images[1].rank, None);
        assert!(top.images[1].discoverer_id.is_none());
    }

    #[test]
    fn test_submit_reply_tolerates_missing_fields() {
        let reply: SubmitReply = serde_json::from_str(r#"{ "accepted": true }"#).unwrap();
        assert!(reply.accepted);
        assert!(reply.rank.is_none());
        assert!(reply.message.is_none());
    }

    #[test]
    fn test_build_hash_shape() {
        let hash = build_hash();
        assert!(hash == "unknown" || (hash.len() == 12 && hash.chars().all(|c| c.is_ascii_hexdigit())));
    }

    #[test]
    fn test_base_url_trailing_slash_stripped() {
        let client = LeaderboardClient::new("https://example.test/api/").unwrap();
        assert_eq!(client.base_url, "https://example.test/api");
    }
}
