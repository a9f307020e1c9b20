#![allow(dead_code)]

use std::{path::PathBuf, sync::Arc, time::Duration};

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
    response::Response,
};
use tower::ServiceExt;
use uuid::Uuid;

use runbox::{
    api::{self, AppState},
    metrics::MetricsRegistry,
    pipeline::{Pipeline, stage::ProcessStageRunner, workspace::WorkspaceManager},
    runtime::{CommandTemplate, RuntimeDescriptor, RuntimeRegistry},
};

pub struct TestApp {
    pub router: Router,
    pub workspace_root: PathBuf,
}

impl TestApp {
    pub async fn get(&self, uri: &str) -> Response {
        let request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn send_json(&self, method: Method, uri: &str, body: serde_json::Value) -> Response {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn post_json(&self, uri: &str, body: serde_json::Value) -> Response {
        self.send_json(Method::POST, uri, body).await
    }

    pub fn workspace_entries(&self) -> usize {
        std::fs::read_dir(&self.workspace_root).unwrap().count()
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.workspace_root);
    }
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn execute(app: &TestApp, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
    let response = app.post_json("/api/v2/execute", body).await;
    let status = response.status();
    (status, body_json(response).await)
}

pub fn shell_app() -> TestApp {
    build_app(RuntimeRegistry::new(shell_descriptors()).unwrap())
}

pub fn builtin_app() -> TestApp {
    build_app(RuntimeRegistry::builtin().unwrap())
}

fn build_app(registry: RuntimeRegistry) -> TestApp {
    let workspace_root = std::env::temp_dir().join(format!("runbox-http-test-{}", Uuid::new_v4()));
    std::fs::create_dir_all(&workspace_root).unwrap();

    let registry = Arc::new(registry);
    let metrics = Arc::new(MetricsRegistry::new());
    let pipeline = Arc::new(Pipeline::new(
        registry.clone(),
        WorkspaceManager::new(workspace_root.clone()),
        Arc::new(ProcessStageRunner::new(1024 * 1024)),
        metrics.clone(),
    ));
    let state = AppState::new(
        registry,
        pipeline,
        metrics,
        Duration::from_secs(5),
        Duration::from_secs(10),
    );

    TestApp {
        router: api::routes(state),
        workspace_root,
    }
}

fn template(program: &str, args: &[&str]) -> CommandTemplate {
    CommandTemplate {
        program: program.to_string(),
        args: args.iter().map(|arg| arg.to_string()).collect(),
        env: Vec::new(),
    }
}

// toolchain-free catalog: "shell" interprets the submitted script, "buildlang"
// runs it as the compile step, "ghostlang" points at a binary that cannot exist
fn shell_descriptors() -> Vec<RuntimeDescriptor> {
    vec![
        RuntimeDescriptor {
            language: "shell".to_string(),
            version: "0.1.0".to_string(),
            aliases: vec!["sh-lang".to_string()],
            extension: "sh".to_string(),
            compile: Vec::new(),
            run: template("sh", &["{file}"]),
        },
        RuntimeDescriptor {
            language: "buildlang".to_string(),
            version: "0.2.0".to_string(),
            aliases: Vec::new(),
            extension: "build".to_string(),
            compile: vec![template("sh", &["{file}"])],
            run: template("sh", &["-c", "printf ran-after-build"]),
        },
        RuntimeDescriptor {
            language: "ghostlang".to_string(),
            version: "0.0.1".to_string(),
            aliases: Vec::new(),
            extension: "ghost".to_string(),
            compile: Vec::new(),
            run: template("runbox-missing-binary-xyz", &["{file}"]),
        },
    ]
}
