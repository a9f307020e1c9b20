use std::{sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use uuid::Uuid;

use crate::{
    error::ServiceError,
    metrics::MetricsRegistry,
    models::{
        ExecuteRequest, ExecuteResponse, PackageInfo, PackageRequest, PackageResponse, RuntimeInfo,
    },
    pipeline::{Job, Pipeline, clamp_timeout, workspace::validate_file_name},
    runtime::RuntimeRegistry,
};

#[derive(Clone)]
pub struct AppState {
    registry: Arc<RuntimeRegistry>,
    pipeline: Arc<Pipeline>,
    metrics: Arc<MetricsRegistry>,
    run_timeout: Duration,
    compile_timeout: Duration,
}

impl AppState {
    pub fn new(
        registry: Arc<RuntimeRegistry>,
        pipeline: Arc<Pipeline>,
        metrics: Arc<MetricsRegistry>,
        run_timeout: Duration,
        compile_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            pipeline,
            metrics,
            run_timeout,
            compile_timeout,
        }
    }
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/healthz", get(health))
        .route("/metrics", get(metrics))
        .route("/api/v2/runtimes", get(list_runtimes))
        .route(
            "/api/v2/packages",
            get(list_packages)
                .post(install_package)
                .delete(uninstall_package),
        )
        .route("/api/v2/execute", post(execute))
        .with_state(state)
}

async fn index() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": "runbox is running" }))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

async fn metrics(State(state): State<AppState>) -> (StatusCode, String) {
    (StatusCode::OK, state.metrics.render_prometheus())
}

async fn list_runtimes(State(state): State<AppState>) -> Json<Vec<RuntimeInfo>> {
    Json(
        state
            .registry
            .descriptors()
            .iter()
            .map(|descriptor| RuntimeInfo {
                language: descriptor.language.clone(),
                version: descriptor.version.clone(),
                aliases: descriptor.aliases.clone(),
            })
            .collect(),
    )
}

async fn list_packages(State(state): State<AppState>) -> Json<Vec<PackageInfo>> {
    Json(
        state
            .registry
            .descriptors()
            .iter()
            .map(|descriptor| PackageInfo {
                language: descriptor.language.clone(),
                language_version: descriptor.version.clone(),
                installed: true,
            })
            .collect(),
    )
}

async fn install_package(
    State(state): State<AppState>,
    Json(request): Json<PackageRequest>,
) -> Result<Json<PackageResponse>, ServiceError> {
    resolve_package(&state, request)
}

async fn uninstall_package(
    State(state): State<AppState>,
    Json(request): Json<PackageRequest>,
) -> Result<Json<PackageResponse>, ServiceError> {
    resolve_package(&state, request)
}

// the catalog is baked in, so install and uninstall just acknowledge;
// the response always carries the installed version, not the requested one
fn resolve_package(
    state: &AppState,
    request: PackageRequest,
) -> Result<Json<PackageResponse>, ServiceError> {
    let descriptor = state
        .registry
        .resolve(&request.language)
        .ok_or_else(|| ServiceError::UnsupportedLanguage(request.language.clone()))?;
    Ok(Json(PackageResponse {
        language: descriptor.language.clone(),
        version: descriptor.version.clone(),
    }))
}

async fn execute(
    State(state): State<AppState>,
    Json(request): Json<ExecuteRequest>,
) -> Result<Json<ExecuteResponse>, ServiceError> {
    validate_request(&request)?;
    state.metrics.submitted();

    let ExecuteRequest {
        language,
        version,
        files,
        stdin,
        args,
        run_timeout,
        compile_timeout,
    } = request;

    let job = Job {
        id: Uuid::new_v4(),
        language: language.clone(),
        files,
        stdin,
        args,
        run_timeout: run_timeout.map(clamp_timeout).unwrap_or(state.run_timeout),
        compile_timeout: compile_timeout
            .map(clamp_timeout)
            .unwrap_or(state.compile_timeout),
    };

    // run detached so a dropped connection cannot skip workspace teardown
    let pipeline = state.pipeline.clone();
    let outcome = tokio::spawn(async move { pipeline.execute(job).await }).await??;

    Ok(Json(ExecuteResponse {
        // echo the identifier as submitted, aliases included
        language,
        version: version.unwrap_or(outcome.version),
        compile: outcome.result.compile.map(Into::into),
        run: outcome.result.run.into(),
    }))
}

fn validate_request(request: &ExecuteRequest) -> Result<(), ServiceError> {
    if request.language.trim().is_empty() {
        return Err(ServiceError::InvalidRequest(
            "language is required".to_string(),
        ));
    }
    if request.files.is_empty() {
        return Err(ServiceError::InvalidRequest(
            "files must not be empty".to_string(),
        ));
    }
    if request.files.len() > 16 {
        return Err(ServiceError::InvalidRequest(
            "too many files; max is 16".to_string(),
        ));
    }
    for file in &request.files {
        if file.content.len() > 250_000 {
            return Err(ServiceError::InvalidRequest(
                "file content too large".to_string(),
            ));
        }
        if let Some(name) = &file.name {
            validate_file_name(name)?;
        }
    }
    if request.args.len() > 16 {
        return Err(ServiceError::InvalidRequest(
            "too many runtime args".to_string(),
        ));
    }
    if request
        .stdin
        .as_ref()
        .is_some_and(|stdin| stdin.len() > 256_000)
    {
        return Err(ServiceError::InvalidRequest("stdin too large".to_string()));
    }
    if request.run_timeout == Some(0) || request.compile_timeout == Some(0) {
        return Err(ServiceError::InvalidRequest(
            "timeouts must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::validate_request;
    use crate::{error::ServiceError, models::{ExecuteRequest, SourceFile}};

    fn request(language: &str, files: Vec<SourceFile>) -> ExecuteRequest {
        ExecuteRequest {
            language: language.to_string(),
            version: None,
            files,
            stdin: None,
            args: Vec::new(),
            run_timeout: None,
            compile_timeout: None,
        }
    }

    fn file(name: Option<&str>) -> SourceFile {
        SourceFile {
            name: name.map(|n| n.to_string()),
            content: "print(1)".to_string(),
        }
    }

    #[test]
    fn accepts_a_minimal_request() {
        assert!(validate_request(&request("python", vec![file(None)])).is_ok());
    }

    #[test]
    fn rejects_missing_language_and_files() {
        let missing_language = request("", vec![file(None)]);
        assert!(matches!(
            validate_request(&missing_language),
            Err(ServiceError::InvalidRequest(_))
        ));

        let missing_files = request("python", Vec::new());
        assert!(matches!(
            validate_request(&missing_files),
            Err(ServiceError::InvalidRequest(_))
        ));
    }

    #[test]
    fn rejects_path_escaping_file_names() {
        let bad = request("python", vec![file(Some("../main.py"))]);
        assert!(matches!(
            validate_request(&bad),
            Err(ServiceError::Workspace(_))
        ));
    }

    #[test]
    fn rejects_zero_timeouts() {
        let mut zero_run = request("python", vec![file(None)]);
        zero_run.run_timeout = Some(0);
        assert!(validate_request(&zero_run).is_err());

        let mut zero_compile = request("python", vec![file(None)]);
        zero_compile.compile_timeout = Some(0);
        assert!(validate_request(&zero_compile).is_err());
    }

    #[test]
    fn rejects_oversized_payloads() {
        let mut oversized = request("python", vec![file(None)]);
        oversized.files[0].content = "x".repeat(250_001);
        assert!(validate_request(&oversized).is_err());

        let mut too_many_args = request("python", vec![file(None)]);
        too_many_args.args = (0..17).map(|i| i.to_string()).collect();
        assert!(validate_request(&too_many_args).is_err());
    }
}
