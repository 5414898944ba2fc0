//! GitHub contents API client for reading pipeline definitions.

use async_trait::async_trait;
use bytes::Bytes;
use pipehook_core::capability::{FetchError, SourceFetcher};
use pipehook_core::event::RepoRef;
use reqwest::StatusCode;
use tracing::debug;

const RAW_MEDIA_TYPE: &str = "application/vnd.github.raw";
const USER_AGENT: &str = "pipehook";

/// Fetches files through `GET /repos/{owner}/{repo}/contents/{path}`.
pub struct GitHubFetcher {
    client: reqwest::Client,
    api_base: String,
    token: Option<String>,
}

impl GitHubFetcher {
    pub fn new(api_base: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
        }
    }

    fn contents_url(&self, repo: &RepoRef, path: &str, git_ref: &str) -> String {
        let path = path
            .trim_start_matches('/')
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        format!(
            "{}/repos/{}/{}/contents/{}?ref={}",
            self.api_base,
            urlencoding::encode(&repo.owner),
            urlencoding::encode(&repo.name),
            path,
            urlencoding::encode(git_ref)
        )
    }
}

#[async_trait]
impl SourceFetcher for GitHubFetcher {
    async fn fetch_file(
        &self,
        repo: &RepoRef,
        path: &str,
        git_ref: &str,
    ) -> Result<Bytes, FetchError> {
        let url = self.contents_url(repo, path, git_ref);
        debug!(url = %url, "Fetching file from GitHub");

        let mut request = self
            .client
            .get(&url)
            .header("Accept", RAW_MEDIA_TYPE)
            .header("User-Agent", USER_AGENT);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request
            .send()
            .await
            .map_err(|e| FetchError::Request(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(FetchError::NotFound {
                repo: repo.full_name.clone(),
                path: path.to_string(),
                git_ref: git_ref.to_string(),
            }),
            status if status.is_success() => response
                .bytes()
                .await
                .map_err(|e| FetchError::Request(e.to_string())),
            status => {
                let message = response.text().await.unwrap_or_default();
                Err(FetchError::Status {
                    status: status.as_u16(),
                    path: path.to_string(),
                    message,
                })
            }
        }
    }
}
