//! Read-only HTTP lookup of patient documents

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::config::{DEFAULT_SERVER_HOST, DEFAULT_SERVER_PORT};
use crate::db::DocumentStore;

/// Where the server listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    /// Build from raw `SERVER_HOST`/`SERVER_PORT` values. An unset host or
    /// an unparseable port falls back to the defaults.
    pub fn from_values(host: Option<&str>, port: Option<&str>) -> Self {
        let host = host
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .unwrap_or(DEFAULT_SERVER_HOST)
            .to_string();

        let port = match port.map(str::trim) {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!(
                    "Invalid SERVER_PORT '{}', using {}",
                    raw, DEFAULT_SERVER_PORT
                );
                DEFAULT_SERVER_PORT
            }),
            None => DEFAULT_SERVER_PORT,
        };

        Self { host, port }
    }
}

#[derive(Clone)]
pub struct AppState {
    documents: DocumentStore,
}

#[derive(Debug, Deserialize)]
struct PatientQuery {
    patient_id: Option<String>,
}

pub fn router(documents: DocumentStore) -> Router {
    Router::new()
        .route("/", get(patient_handler))
        .route("/home", get(patient_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { documents })
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

async fn patient_handler(
    State(state): State<AppState>,
    Query(query): Query<PatientQuery>,
) -> Response {
    let patient_id = query.patient_id.unwrap_or_default();
    if patient_id.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "patient_id is required");
    }

    match state.documents.find_by_patient_id(&patient_id).await {
        Ok(Some(document)) => Json(document).into_response(),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            "No data found for the given patient_id",
        ),
        Err(e) => {
            error!("Lookup of {} failed: {:#}", patient_id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

/// Serve until Ctrl-C
pub async fn serve(config: &ServerConfig, documents: DocumentStore) -> Result<()> {
    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", config.host, config.port))?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(documents))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{PatientDocument, Pool};
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::Value;
    use std::collections::BTreeMap;
    use tower::ServiceExt;

    async fn app() -> Router {
        let pool = Pool::sqlite_in_memory().await.unwrap();
        let documents = DocumentStore::new(pool, "patients").unwrap();
        documents.ensure_table().await.unwrap();

        let mut first = PatientDocument::new(
            "TCGA-A1-A0SB-01",
            "BRCA_PANCAN",
            BTreeMap::from([("CCL5".to_string(), 1.5)]),
        );
        first.os = Some(259);
        let duplicate = PatientDocument::new("TCGA-A1-A0SB-01", "LUAD_PANCAN", BTreeMap::new());
        documents.insert_batch(&[first, duplicate]).await.unwrap();

        router(documents)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_found() {
        let (status, body) = get_json(app().await, "/?patient_id=TCGA-A1-A0SB-01").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({
                "patient_id": "TCGA-A1-A0SB-01",
                "cancer_cohort": "BRCA_PANCAN",
                "genes": {"CCL5": 1.5},
                "DSS": null,
                "OS": 259,
                "clinical_stage": null
            })
        );
    }

    #[tokio::test]
    async fn test_home_route() {
        let (status, body) = get_json(app().await, "/home?patient_id=TCGA-A1-A0SB-01").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cancer_cohort"], "BRCA_PANCAN");
        assert!(body.get("id").is_none());
    }

    #[tokio::test]
    async fn test_missing_patient_id() {
        for uri in ["/", "/?patient_id=", "/home?other=1"] {
            let (status, body) = get_json(app().await, uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
            assert_eq!(body, json!({"error": "patient_id is required"}));
        }
    }

    #[tokio::test]
    async fn test_not_found() {
        let (status, body) = get_json(app().await, "/?patient_id=TCGA-XX-XXXX").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({"error": "No data found for the given patient_id"}));
    }

    #[tokio::test]
    async fn test_patient_id_is_not_trimmed() {
        for uri in ["/?patient_id=%20", "/?patient_id=%20TCGA-A1-A0SB-01"] {
            let (status, _) = get_json(app().await, uri).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
        }
    }

    #[test]
    fn test_server_config_from_values() {
        assert_eq!(
            ServerConfig::from_values(None, None),
            ServerConfig {
                host: "localhost".to_string(),
                port: 5555
            }
        );
        assert_eq!(ServerConfig::from_values(Some("0.0.0.0"), Some("8080")).port, 8080);
        assert_eq!(ServerConfig::from_values(None, Some("not-a-port")).port, 5555);
        assert_eq!(ServerConfig::from_values(None, Some("70000")).port, 5555);
    }
}
