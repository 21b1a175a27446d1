//! Blocking control-protocol client.
//!
//! Must be called from a plain thread or tokio's blocking pool, never
//! from inside an async task.

use std::time::Duration;

use super::error::{ControlError, ErrorBody};
use super::server::CONTROL_PATH;
use super::types::{ControlRequest, ControlResponse, TaskId, WorkerId};

/// Timeout for `connect` and `alive`.
pub const SHORT_CALL_TIMEOUT: Duration = Duration::from_secs(25);
/// Timeout for `terminate`.
pub const TERMINATE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct ControlClient {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl ControlClient {
    /// Client for the daemon whose control endpoint lives at `base_url`.
    pub fn new(base_url: &str) -> Result<Self, ControlError> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ControlError::Http(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Announce `worker` to the scanner.
    pub fn connect(&self, worker: WorkerId) -> Result<(), ControlError> {
        self.expect_ok(ControlRequest::Connect { worker }, SHORT_CALL_TIMEOUT)
    }

    pub fn alive(&self) -> Result<(), ControlError> {
        self.expect_ok(ControlRequest::Alive, SHORT_CALL_TIMEOUT)
    }

    pub fn terminate(&self) -> Result<(), ControlError> {
        self.expect_ok(ControlRequest::Terminate, TERMINATE_TIMEOUT)
    }

    /// Run the peer's phase for `task_id`, blocking until it finishes.
    /// Returns the peer's result count.
    pub fn run(&self, task_id: TaskId, timeout: Duration) -> Result<u64, ControlError> {
        match self.call(&ControlRequest::Run { task_id }, timeout)? {
            ControlResponse::Completed { count } => Ok(count),
            ControlResponse::Duplicate {
                count: Some(count), ..
            } => {
                tracing::warn!(task_id = %task_id, url = %self.base_url, "Peer had already run task");
                Ok(count)
            }
            ControlResponse::Duplicate { count: None, .. } => Err(ControlError::TaskFailed {
                task_id,
                reason: "task is still in progress on the peer".into(),
            }),
            other => Err(ControlError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    /// Ask a scanner to start a task now.
    pub fn trigger(&self) -> Result<(), ControlError> {
        match self.call(
            &ControlRequest::Run {
                task_id: TaskId::now(),
            },
            SHORT_CALL_TIMEOUT,
        )? {
            ControlResponse::Accepted | ControlResponse::Ok => Ok(()),
            other => Err(ControlError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    fn expect_ok(&self, request: ControlRequest, timeout: Duration) -> Result<(), ControlError> {
        match self.call(&request, timeout)? {
            ControlResponse::Ok => Ok(()),
            other => Err(ControlError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    pub fn call(
        &self,
        request: &ControlRequest,
        timeout: Duration,
    ) -> Result<ControlResponse, ControlError> {
        let url = format!("{}{}", self.base_url, CONTROL_PATH);

        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(request)
            .send()
            .map_err(|e| {
                if e.is_connect() {
                    ControlError::Connect(self.base_url.clone())
                } else if e.is_timeout() {
                    ControlError::Timeout {
                        url: url.clone(),
                        secs: timeout.as_secs(),
                    }
                } else {
                    ControlError::Http(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            let (code, message) = match serde_json::from_str::<ErrorBody>(&text) {
                Ok(body) => (body.error.code, body.error.message),
                Err(_) => ("UNKNOWN".to_string(), text),
            };
            return Err(ControlError::Remote {
                status: status.as_u16(),
                code,
                message,
            });
        }

        response.json::<ControlResponse>().map_err(|e| {
            if e.is_timeout() {
                ControlError::Timeout {
                    url,
                    secs: timeout.as_secs(),
                }
            } else {
                ControlError::UnexpectedResponse(e.to_string())
            }
        })
    }
}

/// Call `connect` until it succeeds, backing off between attempts.
pub fn connect_with_retry(
    client: &ControlClient,
    worker: WorkerId,
    attempts: u32,
    initial_backoff: Duration,
) -> Result<(), ControlError> {
    let mut backoff = initial_backoff;
    let mut attempt = 1;
    loop {
        match client.connect(worker) {
            Ok(()) => {
                tracing::info!(%worker, url = client.base_url(), "Connected to scanner");
                return Ok(());
            }
            Err(e) if attempt < attempts && e.is_transport() => {
                tracing::warn!(
                    %worker,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Scanner not reachable, retrying"
                );
                std::thread::sleep(backoff);
                backoff = backoff.saturating_mul(2);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
