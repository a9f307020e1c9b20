pub mod stage;
pub mod workspace;

use std::{sync::Arc, time::Duration};

use uuid::Uuid;

use crate::{
    error::ServiceError,
    metrics::MetricsRegistry,
    models::SourceFile,
    runtime::{ResolvedCommand, RuntimeDescriptor, RuntimeRegistry},
};

use self::{
    stage::{StageResult, StageRunner, StageSpec},
    workspace::{Workspace, WorkspaceManager},
};

pub const MIN_TIMEOUT_MS: u64 = 50;
pub const MAX_TIMEOUT_MS: u64 = 120_000;

pub fn clamp_timeout(ms: u64) -> Duration {
    Duration::from_millis(ms.clamp(MIN_TIMEOUT_MS, MAX_TIMEOUT_MS))
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub language: String,
    pub files: Vec<SourceFile>,
    pub stdin: Option<String>,
    pub args: Vec<String>,
    pub run_timeout: Duration,
    pub compile_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub compile: Option<StageResult>,
    pub run: StageResult,
}

#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub language: String,
    pub version: String,
    pub result: ExecutionResult,
}

pub struct Pipeline {
    registry: Arc<RuntimeRegistry>,
    workspaces: WorkspaceManager,
    runner: Arc<dyn StageRunner>,
    metrics: Arc<MetricsRegistry>,
    path_env: String,
}

impl Pipeline {
    pub fn new(
        registry: Arc<RuntimeRegistry>,
        workspaces: WorkspaceManager,
        runner: Arc<dyn StageRunner>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let path_env = std::env::var("PATH")
            .unwrap_or_else(|_| "/usr/local/bin:/usr/bin:/bin".to_string());
        Self {
            registry,
            workspaces,
            runner,
            metrics,
            path_env,
        }
    }

    pub async fn execute(&self, job: Job) -> Result<JobOutcome, ServiceError> {
        let descriptor = self
            .registry
            .resolve(&job.language)
            .cloned()
            .ok_or_else(|| ServiceError::UnsupportedLanguage(job.language.clone()))?;
        if job.files.is_empty() {
            return Err(ServiceError::InvalidRequest(
                "files must not be empty".to_string(),
            ));
        }

        self.metrics.started();
        tracing::info!(
            job_id = %job.id,
            language = %descriptor.language,
            files = job.files.len(),
            "job started"
        );

        let workspace = match self.workspaces.create(job.id).await {
            Ok(workspace) => workspace,
            Err(err) => {
                self.metrics.faulted();
                return Err(err.into());
            }
        };

        let outcome = self.run_stages(&workspace, &job, &descriptor).await;
        workspace.destroy().await;

        match &outcome {
            Ok(result) => {
                let compile_timed_out = result
                    .compile
                    .as_ref()
                    .is_some_and(|compile| compile.timed_out);
                if result.run.timed_out || compile_timed_out {
                    self.metrics.timed_out();
                } else if result
                    .compile
                    .as_ref()
                    .is_some_and(|compile| compile.failed())
                {
                    self.metrics.compile_failed();
                }
                self.metrics.completed();
                tracing::info!(
                    job_id = %job.id,
                    language = %descriptor.language,
                    exit_code = ?result.run.exit_code,
                    signal = ?result.run.signal,
                    duration_ms = result.run.duration.as_millis() as u64,
                    "job finished"
                );
            }
            Err(err) => {
                self.metrics.faulted();
                tracing::warn!(job_id = %job.id, error = %err, "job faulted");
            }
        }

        outcome.map(|result| JobOutcome {
            language: descriptor.language.clone(),
            version: descriptor.version.clone(),
            result,
        })
    }

    async fn run_stages(
        &self,
        workspace: &Workspace,
        job: &Job,
        descriptor: &RuntimeDescriptor,
    ) -> Result<ExecutionResult, ServiceError> {
        let main_file = workspace.write_files(&job.files, descriptor).await?;

        let mut compile = None;
        for (step, template) in descriptor.compile.iter().enumerate() {
            let command = template.resolve(&main_file);
            let spec = self.stage_spec(workspace, command, job.compile_timeout, None, &[]);
            let result = self.runner.run(spec).await?;
            tracing::debug!(
                job_id = %job.id,
                step,
                exit_code = ?result.exit_code,
                signal = ?result.signal,
                "compile step finished"
            );
            let failed = result.failed();
            compile = Some(result);
            if failed {
                return Ok(ExecutionResult {
                    compile,
                    run: StageResult::default(),
                });
            }
        }

        let command = descriptor.run.resolve(&main_file);
        let spec = self.stage_spec(
            workspace,
            command,
            job.run_timeout,
            job.stdin.clone(),
            &job.args,
        );
        let run = self.runner.run(spec).await?;

        Ok(ExecutionResult { compile, run })
    }

    fn stage_spec(
        &self,
        workspace: &Workspace,
        command: ResolvedCommand,
        timeout: Duration,
        stdin: Option<String>,
        extra_args: &[String],
    ) -> StageSpec {
        let mut args = command.args;
        args.extend(extra_args.iter().cloned());
        let mut env = vec![
            ("PATH".to_string(), self.path_env.clone()),
            ("HOME".to_string(), workspace.path().display().to_string()),
        ];
        env.extend(command.env);
        StageSpec {
            program: command.program,
            args,
            cwd: workspace.path().to_path_buf(),
            env,
            stdin,
            timeout,
        }
    }
}
