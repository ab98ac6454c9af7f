//! Contents API client over HTTPS (GitHub-compatible).

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};

use super::{
    classify_failure, looks_like_missing_branch, parse_api_error, ContentsApi, PutRequest,
    RemoteError, RemoteFile, RemoteResult, RepoRef,
};
use crate::config::{RemoteSettings, DEFAULT_BRANCH};
use crate::util::normalize_text_option;

const CONNECT_TIMEOUT_SECS: u64 = 10;
const USER_AGENT: &str = concat!("trace-diary/", env!("CARGO_PKG_VERSION"));
const FALLBACK_BRANCHES: [&str; 2] = ["main", "master"];

/// Contents API client bound to one repository and branch.
pub struct GitHubContentsClient {
    api_base: String,
    repo: RepoRef,
    token: String,
    /// Branch that last answered successfully.
    branch: RwLock<String>,
    client: Client,
}

impl std::fmt::Debug for GitHubContentsClient {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("GitHubContentsClient")
            .field("api_base", &self.api_base)
            .field("repo", &self.repo)
            .field("token", &"[REDACTED]")
            .field("branch", &self.current_branch())
            .finish_non_exhaustive()
    }
}

impl GitHubContentsClient {
    pub fn new(
        settings: &RemoteSettings,
        repo: RepoRef,
        branch: Option<String>,
        token: impl Into<String>,
    ) -> RemoteResult<Self> {
        let token = token.into().trim().to_string();
        if token.is_empty() {
            return Err(RemoteError::InvalidConfiguration(
                "access token must not be empty".to_string(),
            ));
        }
        let branch = normalize_text_option(branch).unwrap_or_else(|| DEFAULT_BRANCH.to_string());

        Ok(Self {
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            repo,
            token,
            branch: RwLock::new(branch),
            client: Client::builder()
                .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
                .user_agent(USER_AGENT)
                .build()?,
        })
    }

    pub fn current_branch(&self) -> String {
        self.branch
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn remember_branch(&self, branch: &str) {
        let mut current = self.branch.write().unwrap_or_else(PoisonError::into_inner);
        if *current != branch {
            tracing::info!("Remote branch resolved to {branch}");
            *current = branch.to_string();
        }
    }

    /// Configured branch first, then `main`/`master`, without duplicates.
    fn branch_candidates(&self) -> Vec<String> {
        let mut candidates = vec![self.current_branch()];
        for fallback in FALLBACK_BRANCHES {
            if !candidates.iter().any(|candidate| candidate == fallback) {
                candidates.push(fallback.to_string());
            }
        }
        candidates
    }

    fn contents_url(&self, path: &str) -> String {
        let encoded = path
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_base, self.repo.owner, self.repo.repo, encoded
        )
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("Authorization", format!("token {}", self.token))
            .header("Accept", "application/vnd.github+json")
    }

    async fn failure(response: Response) -> RemoteError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        classify_failure(status, parse_api_error(status, &body))
    }

    async fn get_on_branch(&self, path: &str, branch: &str) -> RemoteResult<BranchOutcome<Option<RemoteFile>>> {
        let response = self
            .authorize(self.client.get(self.contents_url(path)))
            .query(&[("ref", branch)])
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let payload = response.json::<serde_json::Value>().await?;
            return decode_file_payload(payload).map(BranchOutcome::Done);
        }

        let body = response.text().await.unwrap_or_default();
        let message = parse_api_error(status, &body);
        if looks_like_missing_branch(status, &message) {
            return Ok(BranchOutcome::MissingBranch(classify_failure(status, message)));
        }
        if status == StatusCode::NOT_FOUND {
            return Ok(BranchOutcome::Done(None));
        }
        Err(classify_failure(status, message))
    }

    async fn put_on_branch(&self, request: &PutRequest, branch: &str) -> RemoteResult<BranchOutcome<String>> {
        let body = PutBody {
            message: &request.message,
            content: STANDARD.encode(request.content.as_bytes()),
            branch,
            sha: request.sha.as_deref(),
        };
        let response = self
            .authorize(self.client.put(self.contents_url(&request.path)))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let payload = response.json::<PutResponse>().await?;
            return payload
                .content
                .and_then(|content| content.sha)
                .or_else(|| payload.commit.and_then(|commit| commit.sha))
                .ok_or_else(|| {
                    RemoteError::InvalidPayload("write response did not include a sha".to_string())
                })
                .map(BranchOutcome::Done);
        }

        let body = response.text().await.unwrap_or_default();
        let message = parse_api_error(status, &body);
        if looks_like_missing_branch(status, &message) {
            return Ok(BranchOutcome::MissingBranch(classify_failure(status, message)));
        }
        Err(classify_failure(status, message))
    }
}

enum BranchOutcome<T> {
    Done(T),
    MissingBranch(RemoteError),
}

impl ContentsApi for GitHubContentsClient {
    async fn get_file(&self, path: &str) -> RemoteResult<Option<RemoteFile>> {
        let mut last_error = None;
        for branch in self.branch_candidates() {
            match self.get_on_branch(path, &branch).await? {
                BranchOutcome::Done(file) => {
                    self.remember_branch(&branch);
                    return Ok(file);
                }
                BranchOutcome::MissingBranch(error) => {
                    tracing::debug!("Branch {branch} missing while reading {path}");
                    last_error = Some(error);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            RemoteError::InvalidConfiguration("no usable branch".to_string())
        }))
    }

    async fn put_file(&self, request: PutRequest) -> RemoteResult<String> {
        let mut last_error = None;
        for branch in self.branch_candidates() {
            match self.put_on_branch(&request, &branch).await? {
                BranchOutcome::Done(sha) => {
                    self.remember_branch(&branch);
                    tracing::debug!("Wrote {} on {branch}", request.path);
                    return Ok(sha);
                }
                BranchOutcome::MissingBranch(error) => {
                    tracing::debug!("Branch {branch} missing while writing {}", request.path);
                    last_error = Some(error);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            RemoteError::InvalidConfiguration("no usable branch".to_string())
        }))
    }

    async fn check_access(&self) -> RemoteResult<()> {
        let url = format!(
            "{}/repos/{}/{}",
            self.api_base, self.repo.owner, self.repo.repo
        );
        let response = self.authorize(self.client.get(url)).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status == StatusCode::NOT_FOUND {
            return Err(RemoteError::Unauthorized(format!(
                "repository {} is not visible to this token",
                self.repo
            )));
        }
        Err(Self::failure(response).await)
    }
}

#[derive(Serialize)]
struct PutBody<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Deserialize)]
struct PutResponse {
    content: Option<ShaHolder>,
    commit: Option<ShaHolder>,
}

#[derive(Deserialize)]
struct ShaHolder {
    sha: Option<String>,
}

/// Decode a contents payload. Directory listings (arrays) count as missing.
fn decode_file_payload(payload: serde_json::Value) -> RemoteResult<Option<RemoteFile>> {
    if payload.is_array() || payload.is_null() {
        return Ok(None);
    }

    let sha = payload
        .get("sha")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| RemoteError::InvalidPayload("file payload missing sha".to_string()))?
        .to_string();
    let raw = payload
        .get("content")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default();
    let compact: String = raw.chars().filter(|ch| !ch.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact.as_bytes())
        .map_err(|error| RemoteError::InvalidPayload(format!("file content: {error}")))?;
    let content = String::from_utf8(bytes)
        .map_err(|_| RemoteError::InvalidPayload("file content is not UTF-8".to_string()))?;

    Ok(Some(RemoteFile { content, sha }))
}
