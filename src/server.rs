//! Read-only HTTP view of the latest snapshot.
//!
//! The server only ever holds a `SnapshotReader`, so a slow client can never
//! stall the inference loop.

use crate::config::ServerConfig;
use crate::monitor::SnapshotReader;
use tokio_util::sync::CancellationToken;

#[cfg(feature = "web")]
pub fn router(reader: SnapshotReader) -> axum::Router {
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use axum::{Json, Router};

    async fn health() -> Json<serde_json::Value> {
        Json(serde_json::json!({ "ok": true }))
    }

    async fn latest(State(reader): State<SnapshotReader>) -> Response {
        match reader.latest() {
            Some(snapshot) => Json(snapshot.as_ref().clone()).into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        }
    }

    async fn push(State(reader): State<SnapshotReader>) -> Response {
        match reader.latest() {
            Some(snapshot) => Json(snapshot.push_payload()).into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        }
    }

    Router::new()
        .route("/health", get(health))
        .route("/analytics/latest.json", get(latest))
        .route("/analytics/push.json", get(push))
        .with_state(reader)
}

/// Binds and serves until `cancel` fires. Bind errors are returned here, not
/// from the spawned task.
#[cfg(feature = "web")]
pub async fn start_server(
    reader: SnapshotReader,
    cfg: ServerConfig,
    cancel: CancellationToken,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    use anyhow::Context;

    let bind_addr = cfg.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding snapshot server to {bind_addr}"))?;
    let app = router(reader);

    tracing::info!(addr = %bind_addr, "snapshot server listening");
    let server = tokio::spawn(async move {
        let shutdown = async move { cancel.cancelled().await };
        if let Err(err) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
            tracing::error!(error = %err, "snapshot server failed");
        }
    });

    Ok(server)
}

#[cfg(not(feature = "web"))]
pub async fn start_server(
    _reader: SnapshotReader,
    _cfg: ServerConfig,
    _cancel: CancellationToken,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    Err(anyhow::anyhow!("web feature not enabled for koza_vision"))
}

#[cfg(all(test, feature = "web"))]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::core_modules::detection::{BoundingBox, Detection};
    use crate::monitor::SnapshotPublisher;
    use crate::pipeline::{AnalyticsPipeline, Frame};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use image::{Rgb, RgbImage};
    use tower::ServiceExt;

    async fn get_json(app: axum::Router, uri: &str) -> (StatusCode, Option<serde_json::Value>) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).ok())
    }

    fn publish_one(publisher: &SnapshotPublisher) {
        let mut engine = AnalyticsPipeline::new(EngineConfig {
            active_stage: "larva_2".to_string(),
            ..EngineConfig::default()
        });
        let frame = Frame::new(1_000, RgbImage::from_pixel(40, 20, Rgb([90, 90, 90])));
        let detections = vec![Detection::new("cocoon", 0.81, BoundingBox::new(0.0, 0.0, 20.0, 10.0))];
        publisher.publish(engine.process_cycle(2_000, &frame, detections, true));
    }

    #[tokio::test]
    async fn health_is_always_ok() {
        let publisher = SnapshotPublisher::new();
        let (status, body) = get_json(router(publisher.reader()), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Some(serde_json::json!({ "ok": true })));
    }

    #[tokio::test]
    async fn not_found_before_first_publish() {
        let publisher = SnapshotPublisher::new();
        let (status, _) = get_json(router(publisher.reader()), "/analytics/latest.json").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = get_json(router(publisher.reader()), "/analytics/push.json").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn serves_latest_snapshot_and_push_projection() {
        let publisher = SnapshotPublisher::new();
        let reader = publisher.reader();
        publish_one(&publisher);

        let (status, body) = get_json(router(reader.clone()), "/analytics/latest.json").await;
        assert_eq!(status, StatusCode::OK);
        let body = body.unwrap();
        assert_eq!(body["ts_ms"], 2_000);
        assert_eq!(body["source_frame_ts_ms"], 1_000);
        assert_eq!(body["frame"]["width"], 40);
        assert_eq!(body["stage_hint"]["stage"], "cocoon");
        assert!(body["detections"][0]["metrics"]["size"]["area_px"].is_number());

        let (status, body) = get_json(router(reader), "/analytics/push.json").await;
        assert_eq!(status, StatusCode::OK);
        let body = body.unwrap();
        assert_eq!(body["confidence"], 0.81);
        assert_eq!(body["texture_anomaly"], false);
        assert_eq!(body["size_change_ratio"], 1.0);
    }
}
