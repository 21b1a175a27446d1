//! Control endpoint lifecycle: bind, serve `POST /control`, shut down.
//!
//! Pattern: bind → spawn background task → return handle with shutdown
//! channel. Handlers are synchronous (they run whole pipeline phases), so
//! each request is moved onto tokio's blocking pool.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use tokio::sync::oneshot;

use super::error::ControlError;
use super::types::{ControlRequest, ControlResponse};

pub const CONTROL_PATH: &str = "/control";

/// Role-specific behaviour behind the control endpoint.
pub trait ControlHandler: Send + Sync + 'static {
    /// Role name used in logs and errors.
    fn role(&self) -> &'static str;

    /// Handle one request. May block for the full length of a phase.
    fn handle(&self, request: ControlRequest) -> Result<ControlResponse, ControlError>;
}

/// Build the control router for a handler.
pub fn control_router(handler: Arc<dyn ControlHandler>) -> Router {
    Router::new()
        .route(CONTROL_PATH, post(dispatch))
        .with_state(handler)
}

async fn dispatch(
    State(handler): State<Arc<dyn ControlHandler>>,
    Json(request): Json<ControlRequest>,
) -> Result<Json<ControlResponse>, ControlError> {
    let role = handler.role();
    tracing::debug!(role, op = request.op_name(), "Control request");
    let response = tokio::task::spawn_blocking(move || handler.handle(request))
        .await
        .map_err(|e| ControlError::Internal(format!("{role} handler panicked: {e}")))??;
    Ok(Json(response))
}

// ═══════════════════════════════════════════════════════════
// Server lifecycle
// ═══════════════════════════════════════════════════════════

/// Handle to a running control server.
pub struct ControlServer {
    pub addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl ControlServer {
    /// Stop accepting connections. In-flight requests finish first.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            tracing::info!(addr = %self.addr, "Control server shutdown signal sent");
        }
    }

    /// Shut down and wait for the serving task to exit.
    pub async fn stop(mut self) {
        self.shutdown();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// Bind `addr` and serve the handler's control endpoint in the background.
pub async fn start_control_server(
    addr: &str,
    handler: Arc<dyn ControlHandler>,
) -> Result<ControlServer, std::io::Error> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let addr = listener.local_addr()?;
    let role = handler.role();
    let app = control_router(handler);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        let shutdown_signal = async move {
            let _ = shutdown_rx.await;
            tracing::info!(role, "Control server received shutdown signal");
        };

        tracing::info!(role, %addr, "Control server started");

        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
        {
            tracing::error!(role, "Control server error: {e}");
        }

        tracing::info!(role, "Control server stopped");
    });

    Ok(ControlServer {
        addr,
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::control::types::TaskId;

    struct EchoHandler;

    impl ControlHandler for EchoHandler {
        fn role(&self) -> &'static str {
            "echo"
        }

        fn handle(&self, request: ControlRequest) -> Result<ControlResponse, ControlError> {
            match request {
                ControlRequest::Run { task_id } if task_id.as_secs() == 0 => {
                    Err(ControlError::Busy {
                        current: TaskId::new(1),
                        requested: task_id,
                    })
                }
                ControlRequest::Run { task_id } => Ok(ControlResponse::Completed {
                    count: task_id.as_secs(),
                }),
                ControlRequest::Connect { .. } => Err(ControlError::Unsupported {
                    role: "echo",
                    op: "connect",
                }),
                ControlRequest::Alive | ControlRequest::Terminate => Ok(ControlResponse::Ok),
            }
        }
    }

    fn request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(CONTROL_PATH)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn run_dispatches_to_handler() {
        let app = control_router(Arc::new(EchoHandler));
        let response = app
            .oneshot(request(r#"{"op":"run","task_id":12}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            serde_json::json!({"status":"completed","count":12})
        );
    }

    #[tokio::test]
    async fn handler_error_becomes_structured_body() {
        let app = control_router(Arc::new(EchoHandler));
        let response = app
            .oneshot(request(r#"{"op":"run","task_id":0}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(json_body(response).await["error"]["code"], "BUSY");
    }

    #[tokio::test]
    async fn malformed_request_rejected() {
        let app = control_router(Arc::new(EchoHandler));
        let response = app.oneshot(request(r#"{"op":"explode"}"#)).await.unwrap();
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let app = control_router(Arc::new(EchoHandler));
        let req = Request::builder()
            .method("POST")
            .uri("/nonexistent")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn start_and_stop_server() {
        let server = start_control_server("127.0.0.1:0", Arc::new(EchoHandler))
            .await
            .expect("server should start");
        assert!(server.addr.port() > 0);
        server.stop().await;
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let mut server = start_control_server("127.0.0.1:0", Arc::new(EchoHandler))
            .await
            .expect("server should start");
        server.shutdown();
        server.shutdown(); // Second call should be safe
    }
}
