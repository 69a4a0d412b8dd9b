use std::{collections::HashMap, future::IntoFuture, net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio::{
    net::TcpListener,
    sync::{mpsc, oneshot},
};
use tower_http::services::ServeDir;
use tracing::{debug, info, warn};

use thermostat_common::{store::last_line, HttpConfig};

use crate::apply::Controller;

const JOB_QUEUE_DEPTH: usize = 8;

/// Work for the single task that owns the Bluetooth link.
#[derive(Debug)]
enum DeviceJob {
    ReadTarget(oneshot::Sender<anyhow::Result<f32>>),
    Apply(String),
}

#[derive(Clone)]
struct AppState {
    jobs: mpsc::Sender<DeviceJob>,
    http: Arc<HttpConfig>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize, PartialEq)]
struct StatusBody {
    room_temp: Option<String>,
    eq3_temp: Option<String>,
}

pub async fn serve(controller: Controller) -> anyhow::Result<()> {
    let http = Arc::new(controller.config().http.clone());
    let (jobs, queue) = mpsc::channel(JOB_QUEUE_DEPTH);
    let app = router(AppState {
        jobs,
        http: http.clone(),
    });

    let port = std::env::var("CONTROLLER_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(http.port);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    tokio::select! {
        result = axum::serve(listener, app).into_future() => result?,
        () = run_device_worker(controller, queue) => {}
    }
    Ok(())
}

fn router(state: AppState) -> Router {
    let web_root = state.http.web_root.clone();
    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route(
            "/api/thermostat/temperature",
            get(handle_get_temperature).post(handle_set_temperature),
        );
    let app = match web_root {
        Some(root) => app.fallback_service(ServeDir::new(root)),
        None => app,
    };
    app.with_state(state)
}

/// Device jobs run one at a time, in arrival order.
async fn run_device_worker(controller: Controller, mut queue: mpsc::Receiver<DeviceJob>) {
    while let Some(job) = queue.recv().await {
        match job {
            DeviceJob::ReadTarget(reply) => {
                let result = controller.current_target().await;
                reply_with_target(&controller, result, reply).await;
            }
            DeviceJob::Apply(value) => {
                let result = controller.apply_value(&value).await;
                if let Err(err) = controller.forward_failure(result).await {
                    warn!("failed to apply requested temperature {value}: {err:#}");
                }
            }
        }
    }
}

/// Failed reads reach the operator the same way failed applies do.
async fn reply_with_target(
    controller: &Controller,
    result: anyhow::Result<f32>,
    reply: oneshot::Sender<anyhow::Result<f32>>,
) {
    let result = controller.forward_failure(result).await;
    if reply.send(result).is_err() {
        debug!("temperature requester went away");
    }
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusBody {
        room_temp: read_last_line(state.http.room_temp_file.as_ref()).await,
        eq3_temp: read_last_line(state.http.eq3_temp_file.as_ref()).await,
    })
}

async fn handle_get_temperature(State(state): State<AppState>) -> axum::response::Response {
    let (reply, response) = oneshot::channel();
    if state.jobs.send(DeviceJob::ReadTarget(reply)).await.is_err() {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "Device worker stopped");
    }
    match response.await {
        Ok(Ok(target)) => Json(target).into_response(),
        Ok(Err(err)) => {
            warn!("failed to read thermostat temperature: {err:#}");
            error_response(
                StatusCode::BAD_GATEWAY,
                "Failed to read thermostat temperature",
            )
        }
        Err(_) => error_response(StatusCode::SERVICE_UNAVAILABLE, "Device worker stopped"),
    }
}

async fn handle_set_temperature(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> axum::response::Response {
    let Some(value) = params.get("value").map(|value| value.trim()) else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    if value.parse::<f32>().is_err() {
        return error_response(StatusCode::BAD_REQUEST, "Invalid temperature value");
    }

    match state.jobs.try_send(DeviceJob::Apply(value.to_string())) {
        Ok(()) => (
            StatusCode::ACCEPTED,
            format!("Request to set temperature to {value} received."),
        )
            .into_response(),
        Err(mpsc::error::TrySendError::Full(_)) => error_response(
            StatusCode::TOO_MANY_REQUESTS,
            "Too many pending thermostat requests",
        ),
        Err(mpsc::error::TrySendError::Closed(_)) => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, "Device worker stopped")
        }
    }
}

async fn read_last_line(path: Option<&PathBuf>) -> Option<String> {
    let path = path?;
    match last_line(path).await {
        Ok(line) => line,
        Err(err) => {
            warn!("failed to read {}: {err}", path.display());
            None
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        apply::tests::{test_config, NoopRecovery},
        notify::tests::RecordingNotifier,
    };

    fn state(http: HttpConfig) -> (AppState, mpsc::Receiver<DeviceJob>) {
        let (jobs, queue) = mpsc::channel(1);
        (
            AppState {
                jobs,
                http: Arc::new(http),
            },
            queue,
        )
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn query(value: &str) -> Query<HashMap<String, String>> {
        Query(HashMap::from([("value".to_string(), value.to_string())]))
    }

    #[tokio::test]
    async fn status_reports_last_lines() {
        let dir = tempfile::tempdir().unwrap();
        let room = dir.path().join("room.csv");
        std::fs::write(&room, "Timestamp, Celsius\n2026-10-16 07:00, 21.1\n").unwrap();
        let (state, _queue) = state(HttpConfig {
            room_temp_file: Some(room),
            eq3_temp_file: Some(dir.path().join("missing.csv")),
            ..HttpConfig::default()
        });

        let response = handle_get_status(State(state)).await.into_response();

        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"room_temp": "2026-10-16 07:00, 21.1", "eq3_temp": null})
        );
    }

    #[tokio::test]
    async fn set_temperature_queues_apply() {
        let (state, mut queue) = state(HttpConfig::default());

        let response = handle_set_temperature(State(state), query(" 21.5")).await;

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(
            body_text(response).await,
            "Request to set temperature to 21.5 received."
        );
        match queue.try_recv() {
            Ok(DeviceJob::Apply(value)) => assert_eq!(value, "21.5"),
            other => panic!("unexpected job {other:?}"),
        }
    }

    #[tokio::test]
    async fn set_temperature_rejects_bad_values() {
        let (state, mut queue) = state(HttpConfig::default());

        let missing =
            handle_set_temperature(State(state.clone()), Query(HashMap::new())).await;
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

        let invalid = handle_set_temperature(State(state), query("warm")).await;
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(invalid)
            .await
            .contains("Invalid temperature value"));

        assert!(queue.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_queue_is_reported() {
        let (state, _queue) = state(HttpConfig::default());

        let first = handle_set_temperature(State(state.clone()), query("20")).await;
        let second = handle_set_temperature(State(state), query("21")).await;

        assert_eq!(first.status(), StatusCode::ACCEPTED);
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn read_target_goes_through_worker_queue() {
        let (state, mut queue) = state(HttpConfig::default());
        let worker = tokio::spawn(async move {
            match queue.recv().await {
                Some(DeviceJob::ReadTarget(reply)) => reply.send(Ok(19.5)).unwrap(),
                other => panic!("unexpected job {other:?}"),
            }
        });

        let response = handle_get_temperature(State(state)).await;
        worker.await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "19.5");
    }

    #[tokio::test]
    async fn failed_read_is_forwarded_and_answered() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let controller = Controller::new(
            test_config(dir.path()),
            notifier.clone(),
            Arc::new(NoopRecovery),
        );
        let (reply, response) = oneshot::channel();

        reply_with_target(
            &controller,
            Err(anyhow::anyhow!("thermostat 00:1A:22:0C:55:44 not found during scan")),
            reply,
        )
        .await;

        let err = response.await.unwrap().unwrap_err();
        assert_eq!(
            err.to_string(),
            "thermostat 00:1A:22:0C:55:44 not found during scan"
        );
        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].starts_with("Thermostat set Error: thermostat 00:1A:22:0C:55:44"));
    }
}
