//! GitHub Contents API client
//!
//! Treats one branch of a repository as a versioned blob store:
//! - `GET /repos/{owner}/{repo}/contents/{path}?ref={branch}` reads a file or lists a folder
//! - `PUT /repos/{owner}/{repo}/contents/{path}` creates or updates a file, guarded by `sha`
//! - `GET /repos/{owner}/{repo}/git/blobs/{sha}` fetches files the contents call returns without
//!   inline content (over 1 MB)
//!
//! Each successful PUT is a commit on the branch, so every write is
//! attributable in the repository history.

use super::{join_path, Blob, EntryKind, RemoteBlobClient, Revision, StoreEntry, StoreError, StoreResult};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use moodcast_common::config::StoreConfig;
use reqwest::header::{HeaderMap, ACCEPT};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const GITHUB_ACCEPT: &str = "application/vnd.github+json";
const GITHUB_API_VERSION: &str = "2022-11-28";

/// File or folder entry as returned by the Contents API
#[derive(Debug, Clone, Deserialize)]
struct ContentItem {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    sha: String,
    download_url: Option<String>,
    /// Inline content; absent for folders, empty for files over 1 MB
    content: Option<String>,
    /// "base64", or "none" when content was omitted
    encoding: Option<String>,
}

/// A GET on a folder returns an array, on a file an object
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ContentsResponse {
    Folder(Vec<ContentItem>),
    File(Box<ContentItem>),
}

/// Git blob, addressed by the sha from a contents response
#[derive(Debug, Deserialize)]
struct GitBlob {
    content: String,
    encoding: String,
}

#[derive(Debug, Serialize)]
struct PutContentsRequest<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct PutContentsResponse {
    content: PutContent,
}

#[derive(Debug, Deserialize)]
struct PutContent {
    sha: String,
}

/// Rate limiter enforcing a minimum spacing between requests
struct RateLimiter {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    fn new(min_interval: Duration) -> Self {
        Self {
            last_request: Mutex::new(None),
            min_interval,
        }
    }

    /// Wait if necessary to comply with rate limit
    async fn wait(&self) {
        let mut last = self.last_request.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                tracing::debug!("GitHub rate limiting: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        *last = Some(Instant::now());
    }
}

/// GitHub Contents API client
pub struct GitHubContentsClient {
    http_client: reqwest::Client,
    rate_limiter: Arc<RateLimiter>,
    api_base: String,
    raw_base: String,
    owner: String,
    repo: String,
    branch: String,
    token: Option<String>,
}

impl GitHubContentsClient {
    pub fn new(config: &StoreConfig, token: Option<String>) -> StoreResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout())
            .connect_timeout(config.timeout().min(Duration::from_secs(5)))
            .build()
            .map_err(|e| StoreError::Config(e.to_string()))?;

        Ok(Self {
            http_client,
            rate_limiter: Arc::new(RateLimiter::new(config.min_interval())),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            raw_base: config.raw_base.trim_end_matches('/').to_string(),
            owner: config.owner.clone(),
            repo: config.repo.clone(),
            branch: config.branch.clone(),
            token,
        })
    }

    fn contents_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_base,
            self.owner,
            self.repo,
            encode_path(path)
        )
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let builder = self
            .http_client
            .request(method, url)
            .header(ACCEPT, GITHUB_ACCEPT)
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// GET a contents path, mapping HTTP failures to store errors
    async fn get_contents(&self, path: &str) -> StoreResult<ContentsResponse> {
        self.rate_limiter.wait().await;

        let url = self.contents_url(path);
        tracing::debug!(path = %path, url = %url, "GitHub contents GET");

        let response = self
            .request(reqwest::Method::GET, &url)
            .query(&[("ref", self.branch.as_str())])
            .send()
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &headers, &body, path));
        }

        response
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))
    }

    /// Fetch a file's bytes by blob sha
    ///
    /// Content-addressed, so the bytes always belong to `sha`. The raw
    /// download URL can serve a cached older copy.
    async fn get_blob(&self, path: &str, sha: &str) -> StoreResult<Vec<u8>> {
        self.rate_limiter.wait().await;

        let url = format!(
            "{}/repos/{}/{}/git/blobs/{}",
            self.api_base, self.owner, self.repo, sha
        );
        tracing::debug!(path = %path, sha = %sha, "Fetching large blob by sha");

        let response = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &headers, &body, path));
        }

        let blob: GitBlob = response
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;

        match blob.encoding.as_str() {
            "base64" => decode_base64(&blob.content),
            "utf-8" => Ok(blob.content.into_bytes()),
            other => Err(StoreError::Decode(format!(
                "{} blob has unsupported encoding '{}'",
                path, other
            ))),
        }
    }
}

#[async_trait]
impl RemoteBlobClient for GitHubContentsClient {
    fn name(&self) -> &'static str {
        "github"
    }

    async fn read(&self, path: &str) -> StoreResult<Blob> {
        let item = match self.get_contents(path).await? {
            ContentsResponse::File(item) => *item,
            ContentsResponse::Folder(_) => {
                return Err(StoreError::NotFound(format!("{} is a folder", path)))
            }
        };

        let content = match (item.encoding.as_deref(), item.content.as_deref()) {
            (Some("base64"), Some(encoded)) => decode_base64(encoded)?,
            _ => self.get_blob(path, &item.sha).await?,
        };

        tracing::debug!(path = %path, sha = %item.sha, bytes = content.len(), "Read blob from GitHub");

        Ok(Blob {
            content,
            revision: Revision::new(item.sha),
        })
    }

    async fn write(
        &self,
        path: &str,
        content: &[u8],
        expected: Option<&Revision>,
        message: &str,
    ) -> StoreResult<Revision> {
        self.rate_limiter.wait().await;

        let url = self.contents_url(path);
        let body = PutContentsRequest {
            message,
            content: BASE64.encode(content),
            branch: &self.branch,
            sha: expected.map(|r| r.as_str()),
        };

        tracing::debug!(
            path = %path,
            expected_sha = expected.map(|r| r.as_str()).unwrap_or("<new>"),
            bytes = content.len(),
            "GitHub contents PUT"
        );

        let response = self
            .request(reqwest::Method::PUT, &url)
            .json(&body)
            .send()
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &headers, &body, path));
        }

        let put: PutContentsResponse = response
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;

        tracing::info!(path = %path, sha = %put.content.sha, "Committed blob to GitHub");

        Ok(Revision::new(put.content.sha))
    }

    async fn list(&self, folder: &str) -> StoreResult<Vec<StoreEntry>> {
        let items = match self.get_contents(folder).await? {
            ContentsResponse::Folder(items) => items,
            ContentsResponse::File(_) => {
                return Err(StoreError::NotFound(format!("{} is not a folder", folder)))
            }
        };

        Ok(items
            .into_iter()
            .map(|item| StoreEntry {
                kind: match item.kind.as_str() {
                    "file" => EntryKind::File,
                    "dir" => EntryKind::Dir,
                    _ => EntryKind::Other,
                },
                name: item.name,
                fetch_url: item.download_url,
            })
            .collect())
    }

    fn fetch_url(&self, path: &str) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.raw_base,
            self.owner,
            self.repo,
            self.branch,
            encode_path(path)
        )
    }
}

/// Percent-encode each path segment, keeping `/` separators
fn encode_path(path: &str) -> String {
    join_path(&[path])
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Decode GitHub's base64, which wraps lines with `\n`
fn decode_base64(encoded: &str) -> StoreResult<Vec<u8>> {
    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    BASE64
        .decode(compact)
        .map_err(|e| StoreError::Decode(format!("invalid base64 content: {}", e)))
}

/// Map a non-success response to the store error taxonomy
fn classify_failure(status: StatusCode, headers: &HeaderMap, body: &str, path: &str) -> StoreError {
    let rate_limited = headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim() == "0")
        .unwrap_or(false);

    match status {
        StatusCode::NOT_FOUND => StoreError::NotFound(path.to_string()),
        StatusCode::CONFLICT => StoreError::Conflict(path.to_string()),
        // Creating a file that appeared since we looked: `"sha" wasn't supplied`
        StatusCode::UNPROCESSABLE_ENTITY if body.contains("sha") => {
            StoreError::Conflict(path.to_string())
        }
        StatusCode::TOO_MANY_REQUESTS => StoreError::Transient("GitHub rate limit exceeded".to_string()),
        StatusCode::FORBIDDEN if rate_limited => {
            StoreError::Transient("GitHub rate limit exceeded".to_string())
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            StoreError::Unauthorized(format!("{} ({})", path, status.as_u16()))
        }
        s if s.is_server_error() => StoreError::Transient(format!("GitHub returned {}", s.as_u16())),
        s => StoreError::Rejected {
            status: s.as_u16(),
            message: body.chars().take(200).collect(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn test_config() -> StoreConfig {
        StoreConfig {
            owner: "octo".to_string(),
            repo: "mood-tracks".to_string(),
            ..StoreConfig::default()
        }
    }

    #[test]
    fn test_client_creation() {
        let client = GitHubContentsClient::new(&test_config(), None);
        assert!(client.is_ok());
    }

    #[test]
    fn test_contents_url_encodes_segments() {
        let client = GitHubContentsClient::new(&test_config(), None).unwrap();
        assert_eq!(
            client.contents_url("tracks/happy/My Song #1.mp3"),
            "https://api.github.com/repos/octo/mood-tracks/contents/tracks/happy/My%20Song%20%231.mp3"
        );
    }

    #[test]
    fn test_fetch_url_points_at_raw_host() {
        let client = GitHubContentsClient::new(&test_config(), None).unwrap();
        assert_eq!(
            client.fetch_url("tracks/happy/track1.mp3"),
            "https://raw.githubusercontent.com/octo/mood-tracks/main/tracks/happy/track1.mp3"
        );
    }

    #[test]
    fn test_decode_base64_ignores_line_breaks() {
        let decoded = decode_base64("dGltZXN0YW1w\nLHVzZXJuYW1l\n").unwrap();
        assert_eq!(decoded, b"timestamp,username");
    }

    #[test]
    fn test_decode_base64_rejects_garbage() {
        assert!(matches!(decode_base64("!!!"), Err(StoreError::Decode(_))));
    }

    #[test]
    fn test_parse_folder_and_file_responses() {
        let folder: ContentsResponse = serde_json::from_str(
            r#"[{"name":"a.mp3","path":"tracks/happy/a.mp3","type":"file","sha":"abc","download_url":"https://raw/a.mp3"}]"#,
        )
        .unwrap();
        assert!(matches!(folder, ContentsResponse::Folder(items) if items.len() == 1));

        let file: ContentsResponse = serde_json::from_str(
            r#"{"name":"emotions.csv","type":"file","sha":"def","download_url":null,"content":"eA==\n","encoding":"base64"}"#,
        )
        .unwrap();
        assert!(matches!(file, ContentsResponse::File(item) if item.sha == "def"));
    }

    #[test]
    fn test_parse_git_blob() {
        let blob: GitBlob = serde_json::from_str(
            r#"{"sha":"def","size":1,"url":"https://api/blobs/def","content":"eA==\n","encoding":"base64"}"#,
        )
        .unwrap();
        assert_eq!(decode_base64(&blob.content).unwrap(), b"x");
        assert_eq!(blob.encoding, "base64");
    }

    #[test]
    fn test_classify_failure_taxonomy() {
        let empty = HeaderMap::new();
        let p = "stats/emotions.csv";

        assert!(matches!(classify_failure(StatusCode::NOT_FOUND, &empty, "", p), StoreError::NotFound(_)));
        assert!(matches!(classify_failure(StatusCode::CONFLICT, &empty, "", p), StoreError::Conflict(_)));
        assert!(matches!(
            classify_failure(StatusCode::UNPROCESSABLE_ENTITY, &empty, r#"{"message":"\"sha\" wasn't supplied."}"#, p),
            StoreError::Conflict(_)
        ));
        assert!(matches!(
            classify_failure(StatusCode::UNPROCESSABLE_ENTITY, &empty, "invalid branch", p),
            StoreError::Rejected { status: 422, .. }
        ));
        assert!(classify_failure(StatusCode::BAD_GATEWAY, &empty, "", p).is_transient());
        assert!(classify_failure(StatusCode::TOO_MANY_REQUESTS, &empty, "", p).is_transient());
        assert!(matches!(
            classify_failure(StatusCode::FORBIDDEN, &empty, "", p),
            StoreError::Unauthorized(_)
        ));

        let mut limited = HeaderMap::new();
        limited.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        assert!(classify_failure(StatusCode::FORBIDDEN, &limited, "", p).is_transient());
    }
}
