use crate::config::SlicerConfig;
use crate::core::{EngineRunner, Invocation};
use crate::utils::error::{Result, SliceError};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long output readers may keep draining once the engine has exited or
/// been killed.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Runs the engine as a child process with a hard deadline.
#[derive(Debug, Clone)]
pub struct ProcessEngine {
    timeout: Duration,
}

impl ProcessEngine {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn from_config(config: &SlicerConfig) -> Self {
        Self::new(config.engine.timeout())
    }
}

enum Finish {
    Exited(std::process::ExitStatus),
    TimedOut,
    Cancelled,
}

fn spawn_reader<R>(reader: Option<R>) -> Option<JoinHandle<Vec<u8>>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    reader.map(|mut reader| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = reader.read_to_end(&mut buf).await;
            buf
        })
    })
}

/// Collects what a reader captured. A descendant that inherited the pipe can
/// keep it open forever, so the wait is bounded and the reader aborted.
async fn drain(task: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    let Some(mut task) = task else {
        return Vec::new();
    };
    match tokio::time::timeout(DRAIN_GRACE, &mut task).await {
        Ok(joined) => joined.unwrap_or_default(),
        Err(_) => {
            task.abort();
            tracing::debug!("Engine output still open after exit, reader aborted");
            Vec::new()
        }
    }
}

/// Kills the engine and everything it started. The child leads its own
/// process group on unix.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
        // SAFETY: plain syscall on a process group this process created.
        unsafe {
            libc::kill(-pid, libc::SIGKILL);
        }
    }
    let _ = child.kill().await;
    let _ = child.wait().await;
}

#[async_trait]
impl EngineRunner for ProcessEngine {
    async fn run(&self, invocation: &Invocation, cancel: &CancellationToken) -> Result<PathBuf> {
        let started = Instant::now();
        tracing::debug!("Running engine: {}", invocation.argv.join(" "));

        let mut command = Command::new(invocation.program());
        command
            .args(invocation.args())
            .envs(&invocation.env_overlay)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|e| SliceError::EngineInvocationFailed {
                exit_code: None,
                stderr: format!("failed to launch {}: {}", invocation.program(), e),
            })?;

        let stdout_task = spawn_reader(child.stdout.take());
        let stderr_task = spawn_reader(child.stderr.take());

        let finish = tokio::select! {
            status = tokio::time::timeout(self.timeout, child.wait()) => match status {
                Ok(status) => Finish::Exited(status?),
                Err(_) => Finish::TimedOut,
            },
            _ = cancel.cancelled() => Finish::Cancelled,
        };

        if !matches!(finish, Finish::Exited(_)) {
            terminate(&mut child).await;
        }

        let stdout = drain(stdout_task).await;
        let stderr = drain(stderr_task).await;
        let stderr = String::from_utf8_lossy(&stderr).trim().to_string();
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let status = match finish {
            Finish::Exited(status) => status,
            Finish::TimedOut => {
                tracing::warn!(
                    elapsed_ms,
                    "Engine exceeded its {:?} deadline and was killed",
                    self.timeout
                );
                return Err(SliceError::EngineTimeout {
                    seconds: self.timeout.as_secs(),
                });
            }
            Finish::Cancelled => {
                tracing::warn!(elapsed_ms, "Engine run cancelled");
                return Err(SliceError::EngineCancelled);
            }
        };

        tracing::debug!(
            elapsed_ms,
            stdout_bytes = stdout.len(),
            "Engine exited with {}",
            status
        );

        if !status.success() {
            return Err(SliceError::EngineInvocationFailed {
                exit_code: status.code(),
                stderr,
            });
        }

        if !invocation.output_path.is_file() {
            return Err(SliceError::OutputMissing {
                path: invocation.output_path.clone(),
            });
        }

        Ok(invocation.output_path.clone())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::Path;
    use tempfile::TempDir;

    fn script(dir: &Path, body: &str) -> String {
        let path = dir.join("engine.sh");
        std::fs::write(&path, format!("{}\n", body)).unwrap();
        path.display().to_string()
    }

    /// Runs `script` through `/bin/sh` so the engine sees `slice -o <output>`.
    fn invocation(script: String, output: PathBuf) -> Invocation {
        let mut env_overlay = BTreeMap::new();
        env_overlay.insert("CURA_ENGINE_SEARCH_PATH".to_string(), "/srv/cura".to_string());
        Invocation {
            argv: vec![
                "/bin/sh".to_string(),
                script,
                "slice".to_string(),
                "-o".to_string(),
                output.display().to_string(),
            ],
            env_overlay,
            output_path: output,
        }
    }

    #[tokio::test]
    async fn test_successful_run_returns_output() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("job.gcode");
        let program = script(
            dir.path(),
            "echo \";search=$CURA_ENGINE_SEARCH_PATH cmd=$1\" > \"$3\"",
        );

        let path = ProcessEngine::new(Duration::from_secs(10))
            .run(&invocation(program, output.clone()), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(path, output);
        let written = std::fs::read_to_string(&output).unwrap();
        assert_eq!(written.trim(), ";search=/srv/cura cmd=slice");
    }

    #[tokio::test]
    async fn test_nonzero_exit_carries_stderr() {
        let dir = TempDir::new().unwrap();
        let program = script(dir.path(), "echo 'Unknown setting foo' >&2\nexit 3");

        let err = ProcessEngine::new(Duration::from_secs(10))
            .run(&invocation(program, dir.path().join("x.gcode")), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            SliceError::EngineInvocationFailed { exit_code, stderr } => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(stderr, "Unknown setting foo");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_zero_exit_without_output() {
        let dir = TempDir::new().unwrap();
        let program = script(dir.path(), "exit 0");
        let output = dir.path().join("missing.gcode");

        let err = ProcessEngine::new(Duration::from_secs(10))
            .run(&invocation(program, output.clone()), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SliceError::OutputMissing { path } if path == output));
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let dir = TempDir::new().unwrap();
        let mut call = invocation(String::new(), dir.path().join("x.gcode"));
        call.argv = vec![dir.path().join("no-such-engine").display().to_string()];

        let err = ProcessEngine::new(Duration::from_secs(10))
            .run(&call, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SliceError::EngineInvocationFailed { exit_code: None, .. }));
    }

    #[tokio::test]
    async fn test_timeout_kills_engine() {
        let dir = TempDir::new().unwrap();
        let program = script(dir.path(), "exec sleep 30");

        let started = Instant::now();
        let err = ProcessEngine::new(Duration::from_millis(200))
            .run(&invocation(program, dir.path().join("x.gcode")), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SliceError::EngineTimeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_timeout_holds_when_wrapper_forks_engine() {
        let dir = TempDir::new().unwrap();
        let program = script(dir.path(), "sleep 30\necho done");

        let started = Instant::now();
        let err = ProcessEngine::new(Duration::from_millis(200))
            .run(&invocation(program, dir.path().join("x.gcode")), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SliceError::EngineTimeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_cancellation_stops_engine() {
        let dir = TempDir::new().unwrap();
        let program = script(dir.path(), "exec sleep 30");
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let err = ProcessEngine::new(Duration::from_secs(60))
            .run(&invocation(program, dir.path().join("x.gcode")), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, SliceError::EngineCancelled));
    }

    #[tokio::test]
    async fn test_cancellation_stops_forked_engine() {
        let dir = TempDir::new().unwrap();
        let program = script(dir.path(), "sleep 30\necho done");
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = ProcessEngine::new(Duration::from_secs(60))
            .run(&invocation(program, dir.path().join("x.gcode")), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, SliceError::EngineCancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
