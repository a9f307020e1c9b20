use serde::{Deserialize, Serialize};

use crate::pipeline::stage::StageResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    #[serde(default)]
    pub name: Option<String>,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteRequest {
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub files: Vec<SourceFile>,
    #[serde(default)]
    pub stdin: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub run_timeout: Option<u64>,
    #[serde(default)]
    pub compile_timeout: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutput {
    pub stdout: String,
    pub stderr: String,
    pub code: Option<i32>,
    pub signal: Option<String>,
    pub output: String,
}

impl From<StageResult> for StageOutput {
    fn from(value: StageResult) -> Self {
        Self {
            stdout: value.stdout,
            stderr: value.stderr,
            code: value.exit_code,
            signal: value.signal,
            output: value.combined,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub language: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compile: Option<StageOutput>,
    pub run: StageOutput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeInfo {
    pub language: String,
    pub version: String,
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageInfo {
    pub language: String,
    pub language_version: String,
    pub installed: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PackageRequest {
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageResponse {
    pub language: String,
    pub version: String,
}
