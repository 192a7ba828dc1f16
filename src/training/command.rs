//! Trainer backed by an external program (`<cmd> <args..> --job <job.json>`).

use std::path::Path;
use std::process::Command;
use tracing::info;

use super::{TrainedArtifacts, Trainer, TrainingError, TrainingJob};

#[derive(Debug, Clone)]
pub struct CommandTrainer {
    program: String,
    args: Vec<String>,
}

impl CommandTrainer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl Trainer for CommandTrainer {
    fn train(&self, job: &TrainingJob, job_file: &Path) -> Result<TrainedArtifacts, TrainingError> {
        info!(program = %self.program, job = %job_file.display(), "Starting trainer");

        // Trainer output goes straight to the terminal; training runs for minutes.
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg("--job")
            .arg(job_file)
            .status()
            .map_err(|source| TrainingError::Io {
                path: job_file.to_path_buf(),
                source,
            })?;

        if !status.success() {
            return Err(TrainingError::TrainerFailed(format!(
                "{} exited with {status}",
                self.program
            )));
        }

        Ok(TrainedArtifacts::from_job(job))
    }

    fn name(&self) -> &str {
        &self.program
    }
}
