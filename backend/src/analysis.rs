use actix_web::http::StatusCode;
use shared::{AnalysisData, AnalysisFailure, AnalysisSuccess};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::logstore::models::VisionLogInput;
use crate::logstore::store::VisionLogStore;
use crate::vision::classifier::Classifier;
use crate::vision::{AnalysisResult, PipelineError};

pub const MISSING_FILE: &str = "File gambar tidak ditemukan. Pastikan field name adalah \"image\".";
pub const LAUNCH_FAILED: &str = "Gagal menjalankan Python vision script";
pub const EXITED_WITH_ERROR: &str = "Error saat klasifikasi vision";
pub const MALFORMED_OUTPUT: &str = "Error parsing hasil vision";
pub const ANALYSIS_FAILED: &str = "Vision analisis gagal";
pub const TIMED_OUT: &str = "Klasifikasi vision melebihi batas waktu";
pub const INTERNAL_ERROR: &str = "Internal server error (vision)";

#[derive(Debug, Clone, Default)]
pub struct AnalysisRequest {
    pub image_path: Option<PathBuf>,
    pub caller_identity: Option<String>,
}

/// The single terminal response for one request.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisReply {
    Success(AnalysisSuccess),
    Failure {
        status: StatusCode,
        body: AnalysisFailure,
    },
}

impl AnalysisReply {
    pub fn status(&self) -> StatusCode {
        match self {
            AnalysisReply::Success(_) => StatusCode::OK,
            AnalysisReply::Failure { status, .. } => *status,
        }
    }

    pub fn from_error(error: &PipelineError) -> Self {
        let (status, body) = match error {
            PipelineError::InputMissing => {
                (StatusCode::BAD_REQUEST, AnalysisFailure::new(MISSING_FILE))
            }
            PipelineError::ProcessLaunchFailed { cause } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                AnalysisFailure::new(LAUNCH_FAILED).with_error(cause.clone()),
            ),
            PipelineError::ProcessExitedWithError { exit_code, stderr } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                AnalysisFailure::new(EXITED_WITH_ERROR)
                    .with_error(stderr.clone())
                    .with_code(*exit_code),
            ),
            PipelineError::MalformedOutput { reason, raw_output } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                AnalysisFailure::new(MALFORMED_OUTPUT)
                    .with_error(reason.clone())
                    .with_raw_output(String::from_utf8_lossy(raw_output)),
            ),
            PipelineError::Timeout { .. } => (
                StatusCode::GATEWAY_TIMEOUT,
                AnalysisFailure::new(TIMED_OUT).with_error(error.to_string()),
            ),
            PipelineError::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                AnalysisFailure::new(INTERNAL_ERROR).with_error(message.clone()),
            ),
        };
        AnalysisReply::Failure { status, body }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Received,
    Running,
    Parsed,
    LoggingInFlight,
}

/// Tracks where a request is. `respond` consumes it, so a request can
/// reach `Responded` only once.
struct RequestProgress {
    request_id: Uuid,
    stage: Stage,
}

impl RequestProgress {
    fn start() -> Self {
        let request_id = Uuid::new_v4();
        log::debug!("[{}] {:?}", request_id, Stage::Received);
        Self {
            request_id,
            stage: Stage::Received,
        }
    }

    fn advance(&mut self, stage: Stage) {
        log::debug!("[{}] {:?} -> {:?}", self.request_id, self.stage, stage);
        self.stage = stage;
    }

    fn respond(self, reply: AnalysisReply) -> AnalysisReply {
        log::debug!(
            "[{}] {:?} -> Responded ({})",
            self.request_id,
            self.stage,
            reply.status()
        );
        reply
    }
}

/// Runs the classifier for one uploaded image, records successful
/// verdicts and maps every outcome to a caller-facing reply.
pub struct AnalysisService {
    classifier: Arc<dyn Classifier>,
    log_store: Arc<VisionLogStore>,
    log_write_window: Duration,
}

impl AnalysisService {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        log_store: Arc<VisionLogStore>,
        log_write_window: Duration,
    ) -> Self {
        Self {
            classifier,
            log_store,
            log_write_window,
        }
    }

    pub async fn analyze(&self, request: AnalysisRequest) -> AnalysisReply {
        let mut progress = RequestProgress::start();
        log::info!("Received fruit vision analysis request");

        let Some(image_path) = request
            .image_path
            .filter(|path| !path.as_os_str().is_empty())
        else {
            log::warn!("[{}] No image supplied", progress.request_id);
            return progress.respond(AnalysisReply::from_error(&PipelineError::InputMissing));
        };
        log::info!("Image path: {}", image_path.display());

        progress.advance(Stage::Running);
        let result = self.classifier.classify(&image_path).await;
        progress.advance(Stage::Parsed);

        let reply = match result {
            Ok(AnalysisResult::Success(data)) => {
                progress.advance(Stage::LoggingInFlight);
                self.record(&data, request.caller_identity, &image_path)
                    .await;
                AnalysisReply::Success(AnalysisSuccess::new(data))
            }
            Ok(AnalysisResult::Failure { error_message }) => {
                log::warn!(
                    "[{}] Classifier could not analyse the image: {}",
                    progress.request_id,
                    error_message
                );
                AnalysisReply::Failure {
                    status: StatusCode::UNPROCESSABLE_ENTITY,
                    body: AnalysisFailure::new(ANALYSIS_FAILED).with_error(error_message),
                }
            }
            Err(e) => {
                log::error!("[{}] Vision pipeline failed: {}", progress.request_id, e);
                AnalysisReply::from_error(&e)
            }
        };

        progress.respond(reply)
    }

    /// Best-effort: the write runs on its own task and the reply waits for
    /// it at most `log_write_window`.
    async fn record(&self, data: &AnalysisData, caller: Option<String>, image_path: &Path) {
        let input = VisionLogInput::from_analysis(data, caller, image_path);
        let store = Arc::clone(&self.log_store);

        let write = actix_web::rt::spawn(async move {
            let outcome = store.save(input).await;
            match (&outcome.backend, &outcome.error) {
                (Some(backend), _) if outcome.ok => {
                    log::info!("VisionLog saved via {}", backend)
                }
                (_, error) => log::warn!(
                    "Failed to save VisionLog: {}",
                    error.as_deref().unwrap_or("unknown error")
                ),
            }
            outcome
        });

        match tokio::time::timeout(self.log_write_window, write).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => log::warn!("VisionLog task failed: {}", e),
            Err(_) => log::debug!(
                "VisionLog write still in flight after {:?}, responding anyway",
                self.log_write_window
            ),
        }
    }
}
