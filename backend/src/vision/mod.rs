pub mod classifier;
pub mod contract;
pub mod runner;

use shared::AnalysisData;
use std::time::Duration;

/// Decoded classifier verdict.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisResult {
    Success(AnalysisData),
    /// The classifier ran correctly but could not classify the image.
    Failure { error_message: String },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    #[error("No image file was supplied")]
    InputMissing,
    #[error("Failed to launch classifier: {cause}")]
    ProcessLaunchFailed { cause: String },
    #[error("Classifier exited with code {exit_code:?}")]
    ProcessExitedWithError {
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("Classifier output is malformed: {reason}")]
    MalformedOutput { reason: String, raw_output: Vec<u8> },
    #[error("Classifier did not finish within {}s", .limit.as_secs_f64())]
    Timeout { limit: Duration },
    #[error("Internal error: {0}")]
    Internal(String),
}
