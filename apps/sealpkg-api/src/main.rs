use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use sealpkg_manager::{LoggingReloader, PackageManager};
use sealpkg_protocol::{
    ConfigFieldSchema, ConfigMap, OperationOutcome, PackageError, PackageId, PackageInstance,
    ReloadOutcome, ResourceKind, UninstallMode,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

mod openapi;

use crate::openapi::openapi_spec;

#[derive(Debug, Parser)]
#[command(name = "sealpkg-api")]
#[command(about = "sealpkg package manager API")]
struct Cli {
    #[arg(long, env = "SEALPKG_ROOT", default_value = ".sealpkg")]
    root: PathBuf,
    #[arg(long, env = "SEALPKG_LISTEN", default_value = "127.0.0.1:8788")]
    listen: SocketAddr,
    /// Host version checked against package `[package.seal]` bounds.
    #[arg(long, env = "SEALPKG_HOST_VERSION")]
    host_version: Option<String>,
    #[arg(long, env = "SEALPKG_DOWNLOAD_TIMEOUT_SECS", default_value_t = 60)]
    download_timeout_secs: u64,
}

#[derive(Clone)]
struct AppState {
    manager: PackageManager,
}

/// `?id=` on any ID-bearing route takes precedence over the path or body.
#[derive(Debug, Deserialize, Default)]
struct IdQuery {
    id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct IdRequest {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InstallRequest {
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct InstallUrlRequest {
    url: String,
}

#[derive(Debug, Deserialize, Default)]
struct UninstallRequest {
    id: Option<String>,
    #[serde(default)]
    mode: Option<String>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<PackageError> for ApiError {
    fn from(error: PackageError) -> Self {
        let status = match &error {
            PackageError::NotFound(_) => StatusCode::NOT_FOUND,
            PackageError::AlreadyInstalled(_)
            | PackageError::Dependency { .. }
            | PackageError::DependentsEnabled { .. }
            | PackageError::InvalidState(_)
            | PackageError::HostIncompatible { .. } => StatusCode::CONFLICT,
            PackageError::Permission(_) => StatusCode::FORBIDDEN,
            PackageError::MalformedManifest(_)
            | PackageError::ManifestNotFound(_)
            | PackageError::MissingField(_)
            | PackageError::InvalidPackageId { .. }
            | PackageError::InvalidVersion { .. }
            | PackageError::InvalidConstraint { .. }
            | PackageError::InvalidManifest(_)
            | PackageError::Config(_)
            | PackageError::MalformedArchive(_) => StatusCode::BAD_REQUEST,
            PackageError::Download(_) | PackageError::Network(_) => StatusCode::BAD_GATEWAY,
            PackageError::Reload(_) | PackageError::Serialization(_) | PackageError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            message: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();
    let mut builder = PackageManager::builder(&cli.root)
        .download_timeout(Duration::from_secs(cli.download_timeout_secs));
    if let Some(host_version) = cli.host_version {
        builder = builder.host_version(host_version);
    }
    for kind in [
        ResourceKind::Scripts,
        ResourceKind::Decks,
        ResourceKind::Replies,
        ResourceKind::Templates,
    ] {
        builder = builder.reloader(Arc::new(LoggingReloader::new(kind)));
    }
    let manager = builder
        .reloader(Arc::new(LoggingReloader::restart_only(ResourceKind::HelpDocs)))
        .build()
        .await?;

    let app = router(AppState { manager });

    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    info!(listen = %cli.listen, root = %cli.root.display(), "sealpkg-api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/openapi.json", get(openapi_json))
        .route("/package/list", get(list_packages))
        .route("/package/install", post(install_package))
        .route("/package/install-from-url", post(install_from_url))
        .route("/package/uninstall", post(uninstall_package))
        .route("/package/enable", post(enable_package))
        .route("/package/disable", post(disable_package))
        .route("/package/reload", post(reload_package))
        .route("/package/reload-all", post(reload_all))
        .route("/package/{id}", get(get_package))
        .route("/package/{id}/config", get(get_config).post(set_config))
        .route("/package/{id}/config-schema", get(get_config_schema))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "sealpkg-api"
    }))
}

async fn openapi_json() -> Json<serde_json::Value> {
    Json(openapi_spec())
}

async fn list_packages(State(state): State<AppState>) -> Json<Vec<PackageInstance>> {
    Json(state.manager.list())
}

async fn get_package(
    Path(id): Path<String>,
    Query(query): Query<IdQuery>,
    State(state): State<AppState>,
) -> ApiResult<Json<PackageInstance>> {
    let id = resolve_id(query.id, Some(id))?;
    Ok(Json(state.manager.get(&id)?))
}

async fn install_package(
    State(state): State<AppState>,
    Json(request): Json<InstallRequest>,
) -> ApiResult<Json<OperationOutcome>> {
    if request.path.as_os_str().is_empty() {
        return Err(ApiError::bad_request("path is required"));
    }
    Ok(Json(state.manager.install(&request.path).await?))
}

async fn install_from_url(
    State(state): State<AppState>,
    Json(request): Json<InstallUrlRequest>,
) -> ApiResult<Json<OperationOutcome>> {
    if request.url.trim().is_empty() {
        return Err(ApiError::bad_request("url is required"));
    }
    Ok(Json(state.manager.install_from_url(request.url.trim()).await?))
}

async fn uninstall_package(
    Query(query): Query<IdQuery>,
    State(state): State<AppState>,
    body: Option<Json<UninstallRequest>>,
) -> ApiResult<Json<OperationOutcome>> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    let id = resolve_id(query.id, request.id)?;
    let mode = request
        .mode
        .as_deref()
        .map(UninstallMode::parse)
        .unwrap_or_default();
    Ok(Json(state.manager.uninstall(&id, mode).await?))
}

async fn enable_package(
    Query(query): Query<IdQuery>,
    State(state): State<AppState>,
    body: Option<Json<IdRequest>>,
) -> ApiResult<Json<OperationOutcome>> {
    let id = resolve_id(query.id, body_id(body))?;
    Ok(Json(state.manager.enable(&id).await?))
}

async fn disable_package(
    Query(query): Query<IdQuery>,
    State(state): State<AppState>,
    body: Option<Json<IdRequest>>,
) -> ApiResult<Json<OperationOutcome>> {
    let id = resolve_id(query.id, body_id(body))?;
    Ok(Json(state.manager.disable(&id).await?))
}

async fn reload_package(
    Query(query): Query<IdQuery>,
    State(state): State<AppState>,
    body: Option<Json<IdRequest>>,
) -> ApiResult<Json<ReloadOutcome>> {
    let id = resolve_id(query.id, body_id(body))?;
    Ok(Json(state.manager.reload(&id).await?))
}

async fn reload_all(State(state): State<AppState>) -> ApiResult<Json<ReloadOutcome>> {
    Ok(Json(state.manager.reload_all().await?))
}

async fn get_config(
    Path(id): Path<String>,
    Query(query): Query<IdQuery>,
    State(state): State<AppState>,
) -> ApiResult<Json<ConfigMap>> {
    let id = resolve_id(query.id, Some(id))?;
    Ok(Json(state.manager.get_config(&id)?))
}

async fn set_config(
    Path(id): Path<String>,
    Query(query): Query<IdQuery>,
    State(state): State<AppState>,
    Json(config): Json<ConfigMap>,
) -> ApiResult<Json<ConfigMap>> {
    let id = resolve_id(query.id, Some(id))?;
    Ok(Json(state.manager.set_config(&id, config).await?))
}

async fn get_config_schema(
    Path(id): Path<String>,
    Query(query): Query<IdQuery>,
    State(state): State<AppState>,
) -> ApiResult<Json<BTreeMap<String, ConfigFieldSchema>>> {
    let id = resolve_id(query.id, Some(id))?;
    Ok(Json(state.manager.config_schema(&id)?))
}

/// Id from an optional JSON body; a bodyless request relies on `?id=`.
fn body_id(body: Option<Json<IdRequest>>) -> Option<String> {
    body.and_then(|Json(request)| request.id)
}

fn resolve_id(query: Option<String>, fallback: Option<String>) -> ApiResult<PackageId> {
    query
        .filter(|id| !id.trim().is_empty())
        .or(fallback)
        .map(|id| PackageId::from_string(id.trim()))
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::bad_request("package id is required"))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    {
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(error) => {
                    tracing::error!(%error, "failed to install SIGTERM handler");
                }
            }
        };

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }
}
