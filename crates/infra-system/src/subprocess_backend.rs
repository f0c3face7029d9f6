// Subprocess media backend
// reason: tokio::process for async child management, line protocol on stdout
//
// Protocol: the request JSON is written to the runner's stdin as one line, then
// stdin is closed. The runner prints, one per line:
//   PROGRESS <status> <percent> [message]
//   ERROR <message>
//   RESULT <json>
// Anything else is logged at debug level.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use kiln_core::domain::{JobKind, JobStatus};
use kiln_core::port::{MediaBackend, MediaRequest, ProcessError, ProgressReporter, ProgressUpdate};

/// Lines of stderr kept for failure messages
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Environment variables passed through to the runner
    pub env_allowlist: Vec<String>,
    pub timeout: Option<Duration>,
}

impl RunnerConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env_allowlist: vec![
                "PATH".to_string(),
                "HOME".to_string(),
                "USER".to_string(),
                "CUDA_VISIBLE_DEVICES".to_string(),
                "HF_HOME".to_string(),
            ],
            timeout: None,
        }
    }
}

/// One parsed stdout line
#[derive(Debug, Clone, PartialEq)]
pub enum RunnerLine {
    Progress(ProgressUpdate),
    Error(String),
    Result(serde_json::Value),
    Other(String),
}

/// Parse one line of runner output
pub fn parse_line(line: &str) -> RunnerLine {
    let line = line.trim_end();
    if let Some(rest) = line.strip_prefix("PROGRESS ") {
        let mut parts = rest.trim().splitn(3, ' ');
        let status = parts.next().filter(|s| !s.is_empty());
        let percent = parts.next().and_then(|p| p.parse::<f32>().ok());
        let message = parts
            .next()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string);
        return match (status, percent) {
            (Some(status), Some(percent)) => RunnerLine::Progress(ProgressUpdate {
                status: Some(JobStatus::from(status)),
                percent: Some(percent),
                message,
            }),
            _ => RunnerLine::Other(line.to_string()),
        };
    }
    if let Some(rest) = line.strip_prefix("ERROR ") {
        return RunnerLine::Error(rest.trim().to_string());
    }
    if let Some(rest) = line.strip_prefix("RESULT ") {
        return match serde_json::from_str(rest) {
            Ok(value) => RunnerLine::Result(value),
            Err(_) => RunnerLine::Other(line.to_string()),
        };
    }
    RunnerLine::Other(line.to_string())
}

/// Runs every media job through one external runner command
pub struct SubprocessBackend {
    config: RunnerConfig,
    /// Model each kind's last successful run used
    loaded: Mutex<HashMap<JobKind, String>>,
}

impl SubprocessBackend {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            loaded: Mutex::new(HashMap::new()),
        }
    }

    /// Allowlisted variables from the daemon's own environment
    fn filtered_env(&self) -> HashMap<String, String> {
        std::env::vars()
            .filter(|(k, _)| self.config.env_allowlist.contains(k))
            .collect()
    }

    async fn run_child(
        &self,
        request: &MediaRequest,
        progress: &ProgressReporter,
    ) -> Result<serde_json::Value, ProcessError> {
        let mut command = Command::new(&self.config.program);
        command
            .args(&self.config.args)
            .env_clear()
            .envs(self.filtered_env())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| {
            ProcessError::Backend(format!("failed to start {}: {}", self.config.program, e))
        })?;

        let mut input = serde_json::to_vec(request).map_err(|e| ProcessError::InvalidPayload(e.to_string()))?;
        input.push(b'\n');
        // fed from its own task so a runner that prints before reading cannot stall us
        let stdin_task = child.stdin.take().map(|mut stdin| {
            tokio::spawn(async move {
                stdin.write_all(&input).await?;
                stdin.shutdown().await
            })
        });

        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
                tail
            })
        });

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProcessError::Backend("runner stdout unavailable".to_string()))?;
        let mut lines = BufReader::new(stdout).lines();
        let mut result: Option<serde_json::Value> = None;
        let mut reported_error: Option<String> = None;

        while let Some(line) = lines.next_line().await? {
            match parse_line(&line) {
                RunnerLine::Progress(update) => progress.update(update).await,
                RunnerLine::Error(message) => reported_error = Some(message),
                RunnerLine::Result(value) => result = Some(value),
                RunnerLine::Other(text) => debug!(job_id = %request.job_id, line = %text, "Runner output"),
            }
        }

        let status = child.wait().await?;
        if let Some(task) = stdin_task {
            match task.await {
                Ok(Ok(())) => {}
                // the runner may exit without reading its input
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    debug!(job_id = %request.job_id, "Runner closed stdin early");
                }
                Ok(Err(e)) => return Err(ProcessError::Io(e)),
                Err(e) => return Err(ProcessError::Backend(format!("stdin writer failed: {}", e))),
            }
        }
        let stderr_tail = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => VecDeque::new(),
        };

        if let Some(message) = reported_error {
            return Err(ProcessError::Failed(message));
        }
        if !status.success() {
            let detail = stderr_tail.back().cloned().unwrap_or_default();
            return Err(ProcessError::Backend(format!(
                "runner exited with {}{}",
                status,
                if detail.is_empty() {
                    String::new()
                } else {
                    format!(": {}", detail)
                }
            )));
        }
        result.ok_or_else(|| ProcessError::Backend("runner finished without a result".to_string()))
    }
}

#[async_trait]
impl MediaBackend for SubprocessBackend {
    async fn run(
        &self,
        request: MediaRequest,
        progress: ProgressReporter,
    ) -> Result<serde_json::Value, ProcessError> {
        info!(
            job_id = %request.job_id,
            kind = %request.kind,
            program = %self.config.program,
            "Starting media runner"
        );

        let outcome = match self.config.timeout {
            Some(limit) => match timeout(limit, self.run_child(&request, &progress)).await {
                Ok(outcome) => outcome,
                // the child is killed when its handle drops
                Err(_) => Err(ProcessError::Failed(format!(
                    "runner timed out after {}s",
                    limit.as_secs()
                ))),
            },
            None => self.run_child(&request, &progress).await,
        };

        match &outcome {
            Ok(_) => {
                if let Some(model) = request.payload.get("model").and_then(|m| m.as_str()) {
                    self.loaded
                        .lock()
                        .unwrap_or_else(|p| p.into_inner())
                        .insert(request.kind, model.to_string());
                }
                info!(job_id = %request.job_id, kind = %request.kind, "Media runner finished");
            }
            Err(e) => warn!(job_id = %request.job_id, kind = %request.kind, error = %e, "Media runner failed"),
        }
        outcome
    }

    fn loaded_resource(&self, kind: JobKind) -> Option<String> {
        self.loaded
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&kind)
            .cloned()
    }
}

/// Backend used when no runner is configured; every media job fails readably
#[derive(Debug, Default)]
pub struct DisabledBackend;

#[async_trait]
impl MediaBackend for DisabledBackend {
    async fn run(
        &self,
        request: MediaRequest,
        _progress: ProgressReporter,
    ) -> Result<serde_json::Value, ProcessError> {
        Err(ProcessError::ResourceUnavailable(format!(
            "no media runner configured for {} jobs (set media_runner)",
            request.kind
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::port::processor::mocks::RecordingSink;
    use serde_json::json;
    use std::sync::Arc;

    fn request() -> MediaRequest {
        MediaRequest {
            job_id: "j1".to_string(),
            kind: JobKind::Image,
            payload: json!({"prompt": "a fox", "model": "sd-turbo"}),
        }
    }

    fn shell(script: &str) -> SubprocessBackend {
        let mut config = RunnerConfig::new("sh");
        config.args = vec!["-c".to_string(), script.to_string()];
        SubprocessBackend::new(config)
    }

    #[test]
    fn test_parse_line() {
        assert_eq!(
            parse_line("PROGRESS processing 42.5 step 10/20"),
            RunnerLine::Progress(ProgressUpdate {
                status: Some(JobStatus::Processing),
                percent: Some(42.5),
                message: Some("step 10/20".to_string()),
            })
        );
        assert_eq!(parse_line("RESULT {\"assets\": []}"), RunnerLine::Result(json!({"assets": []})));
        assert_eq!(parse_line("ERROR CUDA out of memory"), RunnerLine::Error("CUDA out of memory".into()));
        assert!(matches!(parse_line("PROGRESS processing"), RunnerLine::Other(_)));
        assert!(matches!(parse_line("Loading weights..."), RunnerLine::Other(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runner_protocol() {
        let backend = shell(
            "read req; echo \"PROGRESS loading_resource 5\"; echo \"PROGRESS processing 60 halfway\"; \
             echo \"RESULT {\\\"echo\\\": $req}\"",
        );
        let sink = Arc::new(RecordingSink::default());

        let result = backend
            .run(request(), ProgressReporter::new("j1", sink.clone()))
            .await
            .unwrap();

        assert_eq!(result["echo"]["payload"]["prompt"], "a fox");
        let updates = sink.updates();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[1].message.as_deref(), Some("halfway"));
        assert_eq!(backend.loaded_resource(JobKind::Image).as_deref(), Some("sd-turbo"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runner_error_line_and_exit_code() {
        let backend = shell("cat > /dev/null; echo 'ERROR prompt rejected'; exit 3");
        let err = backend.run(request(), ProgressReporter::noop("j1")).await.unwrap_err();
        assert_eq!(err.to_string(), "prompt rejected");

        let backend = shell("cat > /dev/null; echo 'weights missing' >&2; exit 2");
        let err = backend.run(request(), ProgressReporter::noop("j1")).await.unwrap_err();
        assert!(err.to_string().contains("weights missing"));
        assert!(backend.loaded_resource(JobKind::Image).is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runner_timeout() {
        let mut config = RunnerConfig::new("sh");
        config.args = vec!["-c".to_string(), "sleep 10".to_string()];
        config.timeout = Some(Duration::from_millis(200));
        let backend = SubprocessBackend::new(config);

        let err = backend.run(request(), ProgressReporter::noop("j1")).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    /// Large request and chatty runner: neither side may wait on the other
    #[cfg(unix)]
    #[tokio::test]
    async fn test_large_request_to_runner_that_prints_first() {
        let mut config = RunnerConfig::new("sh");
        config.args = vec![
            "-c".to_string(),
            "yes 'Loading weights...' | head -c 262144; cat > /dev/null; echo 'RESULT {\"ok\": true}'"
                .to_string(),
        ];
        config.timeout = Some(Duration::from_secs(10));
        let backend = SubprocessBackend::new(config);

        let mut big = request();
        big.payload["workflow"] = json!("x".repeat(512 * 1024));
        let result = backend.run(big, ProgressReporter::noop("j1")).await.unwrap();

        assert_eq!(result, json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let backend = SubprocessBackend::new(RunnerConfig::new("/nonexistent/kiln-runner"));
        let err = backend.run(request(), ProgressReporter::noop("j1")).await.unwrap_err();
        assert!(matches!(err, ProcessError::Backend(_)));
    }

    #[tokio::test]
    async fn test_disabled_backend() {
        let err = DisabledBackend
            .run(request(), ProgressReporter::noop("j1"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no media runner configured"));
    }
}
