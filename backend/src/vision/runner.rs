use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;

const READ_CHUNK: usize = 4096;

/// Terminal state of one classifier process. Streams are fully buffered
/// before an outcome is produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// The process terminated. `exit_code` is `None` when it was ended by a signal.
    Completed {
        exit_code: Option<i32>,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },
    LaunchFailed {
        cause: String,
    },
    /// The wall-clock limit expired; the process was killed and reaped.
    TimedOut {
        limit: Duration,
    },
}

/// Single-consumer completion slot. Only the first `resolve` is delivered.
pub struct Completion<T> {
    sender: Option<oneshot::Sender<T>>,
}

impl<T> Completion<T> {
    pub fn channel() -> (Self, oneshot::Receiver<T>) {
        let (sender, receiver) = oneshot::channel();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    /// Returns `false` if this completion was already resolved; the value is dropped.
    pub fn resolve(&mut self, value: T) -> bool {
        match self.sender.take() {
            Some(sender) => {
                if sender.send(value).is_err() {
                    log::debug!("Completion receiver dropped before the outcome arrived");
                }
                true
            }
            None => false,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.sender.is_none()
    }
}

#[derive(Clone, Copy)]
enum Echo {
    Silent,
    Log,
}

/// Launches `<executable> <script> <image>` and waits for it.
///
/// The child is supervised on its own task. If the caller stops waiting
/// (connection dropped) the supervisor still reaps the process, or kills
/// it when the timeout expires, so nothing is orphaned.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    timeout: Option<Duration>,
}

impl ProcessRunner {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub async fn run(&self, executable: &Path, script: &Path, image_path: &Path) -> ProcessOutcome {
        let mut command = Command::new(executable);
        command
            .arg(script)
            .arg(image_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        log::info!(
            "Launching classifier: {} {} {}",
            executable.display(),
            script.display(),
            image_path.display()
        );

        let (completion, outcome) = Completion::channel();
        actix_web::rt::spawn(supervise(command, self.timeout, completion));

        outcome.await.unwrap_or_else(|_| ProcessOutcome::LaunchFailed {
            cause: "classifier supervisor stopped without reporting".to_string(),
        })
    }
}

async fn supervise(
    mut command: Command,
    limit: Option<Duration>,
    mut completion: Completion<ProcessOutcome>,
) {
    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            log::error!("Failed to spawn classifier process: {}", e);
            completion.resolve(ProcessOutcome::LaunchFailed {
                cause: e.to_string(),
            });
            return;
        }
    };

    let outcome = match limit {
        Some(limit) => {
            let collected = tokio::time::timeout(limit, collect(&mut child)).await;
            match collected {
                Ok(outcome) => outcome,
                Err(_) => {
                    log::warn!("Classifier exceeded {:?}, killing it", limit);
                    if let Err(e) = child.kill().await {
                        log::error!("Failed to kill timed out classifier: {}", e);
                    }
                    ProcessOutcome::TimedOut { limit }
                }
            }
        }
        None => collect(&mut child).await,
    };

    if let ProcessOutcome::Completed { exit_code, .. } = &outcome {
        log::info!("Classifier process finished with code: {:?}", exit_code);
    }
    completion.resolve(outcome);
}

async fn collect(child: &mut Child) -> ProcessOutcome {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (stdout, stderr) = tokio::join!(drain(stdout, Echo::Silent), drain(stderr, Echo::Log));

    match child.wait().await {
        Ok(status) => ProcessOutcome::Completed {
            exit_code: status.code(),
            stdout,
            stderr,
        },
        Err(e) => ProcessOutcome::LaunchFailed {
            cause: format!("failed to wait for classifier: {}", e),
        },
    }
}

async fn drain<R>(stream: Option<R>, echo: Echo) -> Vec<u8>
where
    R: AsyncRead + Unpin,
{
    let mut collected = Vec::new();
    let Some(mut stream) = stream else {
        return collected;
    };

    let mut chunk = [0u8; READ_CHUNK];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if let Echo::Log = echo {
                    log::info!("[classifier] {}", String::from_utf8_lossy(&chunk[..n]).trim());
                }
                collected.extend_from_slice(&chunk[..n]);
            }
            Err(e) => {
                log::warn!("Error reading classifier output: {}", e);
                break;
            }
        }
    }
    collected
}
