use anyhow::{Context, Result};

use crate::types::{ResultSubmission, StatusSnapshot, SubmitOutcome, WorkItemPayload, WorkResponse};

/// Worker-side HTTP client for the dispatcher's three routes.
///
/// Mirrors the shape of a thin remote-RPC client: one method per endpoint,
/// a base URL, and a single reusable `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct WorkClient {
    base_url: String,
    http: reqwest::Client,
}

impl WorkClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// Pull one work item. Never raises on a connection failure: the caller
    /// sees `WorkResponse::ServerUnavailable` and can back off and retry.
    pub async fn get_work(&self) -> Result<WorkResponse> {
        let url = format!("{}/work", self.base_url);

        let res = match self.http.get(&url).send().await {
            Ok(res) => res,
            Err(err) if err.is_connect() || err.is_timeout() => {
                tracing::warn!(error = %err, "dispatcher unreachable; treating as server_unavailable");
                return Ok(WorkResponse::ServerUnavailable);
            }
            Err(err) => return Err(err).context("GET /work failed"),
        };

        match res.status() {
            reqwest::StatusCode::NOT_FOUND => Ok(WorkResponse::AllWorkComplete),
            reqwest::StatusCode::SERVICE_UNAVAILABLE => Ok(WorkResponse::ServerUnavailable),
            _ => {
                let res = res
                    .error_for_status()
                    .context("GET /work returned an error status")?;
                let item: WorkItemPayload = res
                    .json()
                    .await
                    .context("failed to decode /work response body")?;
                Ok(WorkResponse::Work(item))
            }
        }
    }

    /// Submit a completed result. `result` must not contain an embedded
    /// newline; the server rejects it with a 400 if it does.
    pub async fn submit_result(&self, work_id: u64, result: String) -> Result<SubmitOutcome> {
        let url = format!("{}/result", self.base_url);
        let body = ResultSubmission { work_id, result };

        let res = match self.http.post(&url).json(&body).send().await {
            Ok(res) => res,
            Err(err) if err.is_connect() || err.is_timeout() => {
                tracing::warn!(error = %err, work_id, "dispatcher unreachable while submitting result");
                return Ok(SubmitOutcome::ServerUnavailable);
            }
            Err(err) => return Err(err).context("POST /result failed"),
        };

        if res.status() == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            return Ok(SubmitOutcome::ServerUnavailable);
        }
        res.error_for_status()
            .context("POST /result returned an error status")?;
        Ok(SubmitOutcome::Accepted)
    }

    /// Fetch the current status snapshot. Unlike `get_work`/`submit_result`
    /// this does not special-case connection failures — status polling is
    /// diagnostic, not part of the dispatch loop.
    pub async fn get_status(&self) -> Result<StatusSnapshot> {
        let url = format!("{}/status", self.base_url);
        let res = self
            .http
            .get(&url)
            .send()
            .await
            .context("GET /status failed")?
            .error_for_status()
            .context("GET /status returned an error status")?;
        res.json()
            .await
            .context("failed to decode /status response body")
    }
}
