//! GitHub file fetcher.
//!
//! Without a token, files come from the raw-content host:
//! `https://raw.githubusercontent.com/{owner}/{repo}/{branch}/{path}`.
//! With a token, the contents API is used instead, with bearer auth and a
//! base64 body: `https://api.github.com/repos/{owner}/{repo}/contents/{path}?ref={branch}`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use filekeep_core::{CancelToken, FileError, RemoteFileConfig, Result};
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::throttle::ApiLimiter;

pub const RAW_BASE_URL: &str = "https://raw.githubusercontent.com";
pub const API_BASE_URL: &str = "https://api.github.com";

const CLIENT_AGENT: &str = concat!("filekeep/", env!("CARGO_PKG_VERSION"));
const API_VERSION: &str = "2022-11-28";

/// Subset of the contents API response we use.
#[derive(Debug, Deserialize)]
struct ContentsResponse {
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: String,
    #[serde(default)]
    size: u64,
}

pub struct GitHubClient {
    http: Client,
    raw_base: String,
    api_base: String,
    limiter: ApiLimiter,
}

impl std::fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubClient")
            .field("raw_base", &self.raw_base)
            .field("api_base", &self.api_base)
            .field("limiter", &self.limiter)
            .finish()
    }
}

impl GitHubClient {
    pub fn new() -> Self {
        Self::with_base_urls(RAW_BASE_URL, API_BASE_URL)
    }

    /// Point the client at other hosts (a mock server in tests).
    pub fn with_base_urls(raw_base: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            raw_base: raw_base.into().trim_end_matches('/').to_string(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            limiter: ApiLimiter::default(),
        }
    }

    pub fn with_limiter(mut self, limiter: ApiLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn raw_url(&self, config: &RemoteFileConfig) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.raw_base,
            config.owner,
            config.repo,
            config.branch,
            config.normalized_path()
        )
    }

    /// Contents API URL without the `ref` query.
    pub fn api_url(&self, config: &RemoteFileConfig) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_base,
            config.owner,
            config.repo,
            config.normalized_path()
        )
    }

    /// Fetch the whole file into memory.
    #[instrument(skip(self, config, cancel), level = "debug", fields(remote = %config.display_address()))]
    pub async fn fetch(&self, config: &RemoteFileConfig, cancel: &CancelToken) -> Result<Vec<u8>> {
        cancel
            .run(async {
                match config.auth_token.as_deref() {
                    Some(token) => self.fetch_api(config, token).await,
                    None => self.fetch_raw(config).await,
                }
            })
            .await
    }

    async fn fetch_raw(&self, config: &RemoteFileConfig) -> Result<Vec<u8>> {
        let url = self.raw_url(config);
        let resp = self
            .http
            .get(&url)
            .header(USER_AGENT, CLIENT_AGENT)
            .send()
            .await
            .map_err(|e| FileError::io(format!("Request to {} failed", url), e))?;
        let resp = check_status(resp, config).await?;

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| FileError::io(format!("Failed to read body from {}", url), e))?;
        debug!("Downloaded {} bytes from {}", bytes.len(), url);
        Ok(bytes.to_vec())
    }

    async fn fetch_api(&self, config: &RemoteFileConfig, token: &str) -> Result<Vec<u8>> {
        if !self.limiter.try_acquire() {
            debug!("GitHub API budget spent, waiting for a request slot");
            self.limiter.acquire().await;
        }

        let url = self.api_url(config);
        let resp = self
            .http
            .get(&url)
            .query(&[("ref", config.branch.as_str())])
            .bearer_auth(token)
            .header(USER_AGENT, CLIENT_AGENT)
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .send()
            .await
            .map_err(|e| FileError::io(format!("Request to {} failed", url), e))?;
        let resp = check_status(resp, config).await?;

        let contents: ContentsResponse = resp.json().await.map_err(|e| {
            FileError::format(format!("Unexpected contents response from {}", url), e)
        })?;
        let data = decode_contents(&contents, config)?;
        debug!("Downloaded {} bytes from {}", data.len(), url);
        Ok(data)
    }
}

impl Default for GitHubClient {
    fn default() -> Self {
        Self::new()
    }
}

async fn check_status(resp: Response, config: &RemoteFileConfig) -> Result<Response> {
    let status = resp.status();
    if status == StatusCode::NOT_FOUND {
        return Err(FileError::NotFound(config.display_address()));
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(FileError::io_msg(format!(
            "GitHub returned {} for {}: {}",
            status,
            config.display_address(),
            body
        )));
    }
    Ok(resp)
}

fn decode_contents(contents: &ContentsResponse, config: &RemoteFileConfig) -> Result<Vec<u8>> {
    if contents.encoding != "base64" {
        // Files over 1 MB come back with encoding "none" and no content.
        return Err(FileError::io_msg(format!(
            "{} ({} bytes) is not available through the contents API (encoding '{}')",
            config.display_address(),
            contents.size,
            contents.encoding
        )));
    }
    let packed: String = contents
        .content
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    STANDARD.decode(packed).map_err(|e| {
        FileError::format(
            format!("Invalid base64 content for {}", config.display_address()),
            e,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config() -> RemoteFileConfig {
        RemoteFileConfig::new("octo", "settings", "/config/app.json")
    }

    #[test]
    fn test_urls() {
        let client = GitHubClient::new();
        let config = config().with_branch("dev");
        assert_eq!(
            client.raw_url(&config),
            "https://raw.githubusercontent.com/octo/settings/dev/config/app.json"
        );
        assert_eq!(
            client.api_url(&config),
            "https://api.github.com/repos/octo/settings/contents/config/app.json"
        );
    }

    #[tokio::test]
    async fn test_fetch_raw() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/octo/settings/main/config/app.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"a":1}"#))
            .expect(1)
            .mount(&server)
            .await;

        let client = GitHubClient::with_base_urls(server.uri(), server.uri());
        let data = client.fetch(&config(), &CancelToken::none()).await.unwrap();
        assert_eq!(data, br#"{"a":1}"#);
    }

    #[tokio::test]
    async fn test_fetch_api_decodes_base64() {
        let server = MockServer::start().await;
        let encoded = STANDARD.encode(r#"{"secret":true}"#);
        // GitHub wraps the payload at 60 columns.
        let wrapped = format!("{}\n{}\n", &encoded[..8], &encoded[8..]);
        Mock::given(method("GET"))
            .and(path("/repos/octo/settings/contents/config/app.json"))
            .and(query_param("ref", "main"))
            .and(header("authorization", "Bearer t0ken"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": wrapped,
                "encoding": "base64",
                "size": 15
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = GitHubClient::with_base_urls(server.uri(), server.uri());
        let data = client
            .fetch(&config().with_token("t0ken"), &CancelToken::none())
            .await
            .unwrap();
        assert_eq!(data, br#"{"secret":true}"#);
    }

    #[tokio::test]
    async fn test_api_requests_draw_from_budget() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/settings/contents/config/app.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": STANDARD.encode("{}"),
                "encoding": "base64",
                "size": 2
            })))
            .mount(&server)
            .await;

        let client = GitHubClient::with_base_urls(server.uri(), server.uri())
            .with_limiter(ApiLimiter::per_hour(2));
        client
            .fetch(&config().with_token("t"), &CancelToken::none())
            .await
            .unwrap();

        // Raw downloads are not metered.
        client.fetch(&config(), &CancelToken::none()).await.ok();

        assert!(client.limiter.try_acquire());
        assert!(!client.limiter.try_acquire());
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = GitHubClient::with_base_urls(server.uri(), server.uri());
        let err = client.fetch(&config(), &CancelToken::none()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_server_error_is_io() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let client = GitHubClient::with_base_urls(server.uri(), server.uri());
        let err = client.fetch(&config(), &CancelToken::none()).await.unwrap_err();
        assert!(matches!(err, FileError::Io { .. }));
        assert!(err.to_string().contains("502"));
    }

    #[tokio::test]
    async fn test_oversized_api_file_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": "",
                "encoding": "none",
                "size": 5_000_000
            })))
            .mount(&server)
            .await;

        let client = GitHubClient::with_base_urls(server.uri(), server.uri());
        let err = client
            .fetch(&config().with_token("t"), &CancelToken::none())
            .await
            .unwrap_err();
        assert!(matches!(err, FileError::Io { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_before_request() {
        let source = filekeep_core::CancelSource::new();
        source.cancel();
        let client = GitHubClient::with_base_urls("http://127.0.0.1:9", "http://127.0.0.1:9");
        let err = client.fetch(&config(), &source.token()).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
