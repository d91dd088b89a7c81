use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::runner::ProcessRunner;
use super::{AnalysisResult, PipelineError, contract};
use crate::config::ClassifierConfig;

/// Anything that can turn an image on disk into a verdict.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, image_path: &Path) -> Result<AnalysisResult, PipelineError>;
}

/// Runs the classifier script under an interpreter, one process per call.
pub struct ProcessClassifier {
    interpreter: PathBuf,
    script: PathBuf,
    runner: ProcessRunner,
}

impl ProcessClassifier {
    pub fn new(interpreter: PathBuf, script: PathBuf, runner: ProcessRunner) -> Self {
        Self {
            interpreter,
            script,
            runner,
        }
    }

    pub fn from_config(config: &ClassifierConfig) -> Self {
        let interpreter =
            resolve_interpreter(&config.interpreter_candidates, &config.interpreter_fallback);
        let classifier = Self::new(
            interpreter,
            config.script_path.clone(),
            ProcessRunner::new(config.timeout()),
        );

        log::info!("Classifier interpreter: {}", classifier.interpreter().display());
        log::info!("Classifier script: {}", classifier.script.display());
        match classifier.runner.timeout() {
            Some(limit) => log::info!("Classifier timeout: {:?}", limit),
            None => log::warn!("Classifier timeout disabled"),
        }
        classifier
    }

    pub fn interpreter(&self) -> &Path {
        &self.interpreter
    }
}

#[async_trait]
impl Classifier for ProcessClassifier {
    async fn classify(&self, image_path: &Path) -> Result<AnalysisResult, PipelineError> {
        let outcome = self
            .runner
            .run(&self.interpreter, &self.script, image_path)
            .await;
        contract::parse(outcome)
    }
}

/// First candidate that exists on disk, else the bare fallback command
/// left for `PATH` lookup.
pub fn resolve_interpreter(candidates: &[PathBuf], fallback: &str) -> PathBuf {
    candidates
        .iter()
        .find(|candidate| candidate.exists())
        .cloned()
        .unwrap_or_else(|| PathBuf::from(fallback))
}
