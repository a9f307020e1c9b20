use std::{
    io,
    os::unix::process::ExitStatusExt,
    path::PathBuf,
    process::Stdio,
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use nix::{
    sys::signal::{Signal, kill, killpg},
    unistd::Pid,
};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    process::Command,
};

const DRAIN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct StageSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    pub stdin: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct StageResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub signal: Option<String>,
    pub combined: String,
    pub timed_out: bool,
    pub duration: Duration,
}

impl StageResult {
    pub fn failed(&self) -> bool {
        self.signal.is_some() || self.exit_code != Some(0)
    }
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed waiting on {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },
}

#[async_trait]
pub trait StageRunner: Send + Sync {
    async fn run(&self, spec: StageSpec) -> Result<StageResult, StageError>;
}

pub struct ProcessStageRunner {
    max_output_bytes: usize,
}

impl ProcessStageRunner {
    pub fn new(max_output_bytes: usize) -> Self {
        Self { max_output_bytes }
    }
}

type SharedBuffer = Arc<Mutex<Vec<u8>>>;

#[async_trait]
impl StageRunner for ProcessStageRunner {
    async fn run(&self, spec: StageSpec) -> Result<StageResult, StageError> {
        let started = Instant::now();

        // relative program paths resolve against the parent cwd on some
        // platforms, so anchor workspace-local binaries explicitly
        let program: PathBuf = if spec.program.starts_with("./") {
            spec.cwd.join(&spec.program)
        } else {
            PathBuf::from(&spec.program)
        };

        let mut command = Command::new(&program);
        command
            .args(&spec.args)
            .current_dir(&spec.cwd)
            .env_clear()
            .envs(spec.env.iter().map(|(key, value)| (key.as_str(), value.as_str())))
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| StageError::Spawn {
            program: spec.program.clone(),
            source,
        })?;
        let pgid = child.id().map(|raw| Pid::from_raw(raw as i32));

        if let Some(payload) = spec.stdin.clone() {
            if let Some(mut pipe) = child.stdin.take() {
                tokio::spawn(async move {
                    let _ = pipe.write_all(payload.as_bytes()).await;
                    let _ = pipe.shutdown().await;
                });
            }
        }

        let stdout_buf: SharedBuffer = Arc::new(Mutex::new(Vec::new()));
        let stderr_buf: SharedBuffer = Arc::new(Mutex::new(Vec::new()));
        let combined_buf: SharedBuffer = Arc::new(Mutex::new(Vec::new()));

        let limit = self.max_output_bytes;
        let stdout_task = child.stdout.take().map(|pipe| {
            tokio::spawn(drain(pipe, limit, stdout_buf.clone(), combined_buf.clone()))
        });
        let stderr_task = child.stderr.take().map(|pipe| {
            tokio::spawn(drain(pipe, limit, stderr_buf.clone(), combined_buf.clone()))
        });

        let mut exit_code = None;
        let mut signal = None;
        let mut timed_out = false;

        match tokio::time::timeout(spec.timeout, child.wait()).await {
            Ok(Ok(status)) => {
                exit_code = status.code();
                signal = status.signal().map(signal_name);
            }
            Ok(Err(source)) => {
                kill_group(pgid);
                let _ = child.kill().await;
                return Err(StageError::Wait {
                    program: spec.program.clone(),
                    source,
                });
            }
            Err(_) => {
                timed_out = true;
                kill_group(pgid);
                let _ = child.kill().await;
                signal = Some(Signal::SIGKILL.as_str().to_string());
            }
        }

        let drain_all = async {
            if let Some(task) = stdout_task {
                let _ = task.await;
            }
            if let Some(task) = stderr_task {
                let _ = task.await;
            }
        };
        tokio::pin!(drain_all);
        if tokio::time::timeout(DRAIN_GRACE, &mut drain_all).await.is_err() {
            // surviving group members keep the pipes open past process exit
            kill_group(pgid);
            let _ = tokio::time::timeout(DRAIN_GRACE, &mut drain_all).await;
        }

        let stdout = take_buffer(&stdout_buf);
        let stderr = take_buffer(&stderr_buf);
        let combined = take_buffer(&combined_buf);

        Ok(StageResult {
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr: String::from_utf8_lossy(&stderr).to_string(),
            exit_code,
            signal,
            combined: String::from_utf8_lossy(&combined).to_string(),
            timed_out,
            duration: started.elapsed(),
        })
    }
}

fn kill_group(pgid: Option<Pid>) {
    if let Some(pgid) = pgid {
        if killpg(pgid, Signal::SIGKILL).is_err() {
            let _ = kill(pgid, Signal::SIGKILL);
        }
    }
}

fn signal_name(raw: i32) -> String {
    // real-time signals have no named variant; a signal death must still
    // report a signal, never read as a stage that did not run
    Signal::try_from(raw)
        .map(|sig| sig.as_str().to_string())
        .unwrap_or_else(|_| format!("SIG{raw}"))
}

fn lock(buffer: &SharedBuffer) -> std::sync::MutexGuard<'_, Vec<u8>> {
    buffer.lock().unwrap_or_else(PoisonError::into_inner)
}

fn take_buffer(buffer: &SharedBuffer) -> Vec<u8> {
    std::mem::take(&mut *lock(buffer))
}

async fn drain<R>(mut reader: R, limit: usize, buffer: SharedBuffer, combined: SharedBuffer)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                // keep reading past the cap so the child never blocks on a full pipe
                let stored = {
                    let mut own = lock(&buffer);
                    let take = n.min(limit.saturating_sub(own.len()));
                    own.extend_from_slice(&chunk[..take]);
                    take
                };
                if stored > 0 {
                    lock(&combined).extend_from_slice(&chunk[..stored]);
                }
            }
            Err(_) => break,
        }
    }
}
