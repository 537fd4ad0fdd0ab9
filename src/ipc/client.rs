use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{ResetRequest, StatusResponse, StopResponse};

/// Client for the control endpoint of a running launcher.
#[derive(Debug, Clone)]
pub struct LauncherClient {
    client: reqwest::Client,
    /// 월드 리셋처럼 오래 걸리는 작업용
    long_client: reqwest::Client,
    base_url: String,
}

impl LauncherClient {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        let long_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(600))
            .build()?;
        Ok(Self {
            client,
            long_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Error body of a failed request: `(error_code, message)`.
    async fn error_of(response: reqwest::Response) -> (String, String) {
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        let code = body
            .get("error_code")
            .and_then(|c| c.as_str())
            .unwrap_or("HTTP_ERROR")
            .to_string();
        let message = body
            .get("error")
            .and_then(|m| m.as_str())
            .map(String::from)
            .unwrap_or_else(|| format!("Launcher returned {}", status));
        (code, message)
    }

    /// GET /api/status. `Ok(None)` when no launcher is listening.
    pub async fn status(&self) -> anyhow::Result<Option<StatusResponse>> {
        let url = format!("{}/api/status", self.base_url);
        let response = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) if e.is_connect() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if !response.status().is_success() {
            let (_, message) = Self::error_of(response).await;
            anyhow::bail!(message);
        }
        Ok(Some(response.json().await?))
    }

    /// Status of the launcher listening on the endpoint, but only if it
    /// serves `working_dir`. Another directory's launcher counts as none.
    pub async fn status_for(&self, working_dir: &Path) -> anyhow::Result<Option<StatusResponse>> {
        let Some(status) = self.status().await? else {
            return Ok(None);
        };
        if same_dir(Path::new(&status.working_dir), working_dir) {
            Ok(Some(status))
        } else {
            tracing::debug!(
                "Launcher on {} serves {}, not {}",
                self.base_url,
                status.working_dir,
                working_dir.display()
            );
            Ok(None)
        }
    }

    /// POST /api/stop. `Ok(None)` when no launcher is listening.
    pub async fn stop(&self) -> anyhow::Result<Option<Result<StopResponse, RemoteError>>> {
        let url = format!("{}/api/stop", self.base_url);
        let response = match self.client.post(&url).send().await {
            Ok(r) => r,
            Err(e) if e.is_connect() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if !response.status().is_success() {
            let (code, message) = Self::error_of(response).await;
            return Ok(Some(Err(RemoteError { code, message })));
        }
        Ok(Some(Ok(response.json().await?)))
    }

    /// POST /api/world/reset on the running launcher.
    pub async fn reset_world(&self, seed: &str) -> anyhow::Result<Result<Value, RemoteError>> {
        let url = format!("{}/api/world/reset", self.base_url);
        let body = ResetRequest { seed: seed.to_string() };
        let response = self.long_client.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            let (code, message) = Self::error_of(response).await;
            return Ok(Err(RemoteError { code, message }));
        }
        Ok(Ok(response.json().await?))
    }
}

fn same_dir(a: &Path, b: &Path) -> bool {
    let canon = |p: &Path| std::fs::canonicalize(p).unwrap_or_else(|_| PathBuf::from(p));
    canon(a) == canon(b)
}

/// Error reported by the launcher, as carried in its JSON error body.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct RemoteError {
    pub code: String,
    pub message: String,
}
