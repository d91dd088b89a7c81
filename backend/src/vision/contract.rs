use serde::Deserialize;
use serde_json::Value;
use shared::AnalysisData;

use super::runner::ProcessOutcome;
use super::{AnalysisResult, PipelineError};

const UNKNOWN: &str = "unknown";
const GENERIC_FAILURE: &str = "Classifier reported a failure without a message";

/// Shape the classifier prints on stdout. Only `success` is mandatory.
#[derive(Debug, Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

/// Turns a finished process into a verdict. Exit status is checked before
/// the output is looked at, so a crashed classifier never yields `Success`.
pub fn parse(outcome: ProcessOutcome) -> Result<AnalysisResult, PipelineError> {
    match outcome {
        ProcessOutcome::LaunchFailed { cause } => Err(PipelineError::ProcessLaunchFailed { cause }),
        ProcessOutcome::TimedOut { limit } => Err(PipelineError::Timeout { limit }),
        ProcessOutcome::Completed {
            exit_code: Some(0),
            stdout,
            ..
        } => decode(stdout),
        ProcessOutcome::Completed {
            exit_code, stderr, ..
        } => Err(PipelineError::ProcessExitedWithError {
            exit_code,
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        }),
    }
}

pub fn decode(stdout: Vec<u8>) -> Result<AnalysisResult, PipelineError> {
    let envelope: Envelope = match serde_json::from_slice(&stdout) {
        Ok(envelope) => envelope,
        Err(e) => {
            return Err(PipelineError::MalformedOutput {
                reason: e.to_string(),
                raw_output: stdout,
            });
        }
    };

    if !envelope.success {
        let error_message = envelope
            .error
            .as_ref()
            .and_then(Value::as_str)
            .filter(|message| !message.is_empty())
            .unwrap_or(GENERIC_FAILURE)
            .to_string();
        return Ok(AnalysisResult::Failure { error_message });
    }

    let result = envelope.result.unwrap_or(Value::Null);
    Ok(AnalysisResult::Success(AnalysisData {
        fruit: text_or_unknown(result.get("fruit")),
        disease: text_or_unknown(result.get("disease")),
        confidence: coerce_confidence(result.get("confidence")),
        reasons: coerce_reasons(result.get("reasons")),
    }))
}

fn text_or_unknown(value: Option<&Value>) -> String {
    value
        .and_then(Value::as_str)
        .filter(|text| !text.trim().is_empty())
        .unwrap_or(UNKNOWN)
        .to_string()
}

/// Numbers and numeric strings are accepted; everything else is 0.
/// The result always lies in [0, 1].
pub fn coerce_confidence(value: Option<&Value>) -> f64 {
    let raw = match value {
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    match raw {
        Some(confidence) if confidence.is_finite() => confidence.clamp(0.0, 1.0),
        _ => 0.0,
    }
}

pub fn coerce_reasons(value: Option<&Value>) -> Vec<String> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(text) => Some(text.clone()),
            Value::Number(number) => Some(number.to_string()),
            Value::Bool(flag) => Some(flag.to_string()),
            _ => None,
        })
        .collect()
}
