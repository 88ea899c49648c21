use burn::{
    module::AutodiffModule,
    optim::Optimizer,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder},
    tensor::backend::AutodiffBackend,
};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::debug;

use crate::error::{Result, TrainError};

/// Step counter and bookkeeping stored next to the weights. Written last, so
/// its presence marks a complete checkpoint.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CheckpointState {
    pub global_step: usize,
    pub total_loss: Option<f32>,
}

/// Step-tagged checkpoints in the model directory. Old checkpoints are kept.
pub struct CheckpointStore {
    dir: PathBuf,
    recorder: NamedMpkFileRecorder<FullPrecisionSettings>,
}

impl CheckpointStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        Ok(Self {
            dir,
            recorder: NamedMpkFileRecorder::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn generator_path(&self, step: usize) -> PathBuf {
        self.dir.join(format!("generator-{step}"))
    }

    fn optimizer_path(&self, step: usize) -> PathBuf {
        self.dir.join(format!("optimizer-{step}"))
    }

    fn state_path(&self, step: usize) -> PathBuf {
        self.dir.join(format!("state-{step}.json"))
    }

    /// Steps of every complete checkpoint, ascending.
    pub fn steps(&self) -> Result<Vec<usize>> {
        let mut steps = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name();
                let step = name
                    .to_str()?
                    .strip_prefix("state-")?
                    .strip_suffix(".json")?
                    .parse::<usize>()
                    .ok()?;
                Some(step)
            })
            .collect::<Vec<_>>();
        steps.sort_unstable();
        Ok(steps)
    }

    pub fn latest(&self) -> Result<Option<usize>> {
        Ok(self.steps()?.last().copied())
    }

    pub fn save<B, M, O>(&self, state: &CheckpointState, model: &M, optimizer: &O) -> Result<()>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        O: Optimizer<M, B>,
    {
        let step = state.global_step;
        model
            .clone()
            .save_file(self.generator_path(step), &self.recorder)?;
        Recorder::<B>::record(&self.recorder, optimizer.to_record(), self.optimizer_path(step))?;
        fs::write(self.state_path(step), serde_json::to_string_pretty(state)?)?;

        debug!("checkpoint written to {:?}", self.state_path(step));
        Ok(())
    }

    /// Restore weights, optimizer moments and the step counter of `step`.
    pub fn load<B, M, O>(
        &self,
        step: usize,
        model: M,
        optimizer: O,
        device: &B::Device,
    ) -> Result<(M, O, CheckpointState)>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        O: Optimizer<M, B>,
    {
        let restore_err = |reason: String| TrainError::Restore { step, reason };

        let contents = fs::read_to_string(self.state_path(step))
            .map_err(|err| restore_err(err.to_string()))?;
        let state: CheckpointState =
            serde_json::from_str(&contents).map_err(|err| restore_err(err.to_string()))?;
        if state.global_step != step {
            return Err(restore_err(format!(
                "state file records step {}",
                state.global_step
            )));
        }

        let record = Recorder::<B>::load::<M::Record>(&self.recorder, self.generator_path(step), device)
            .map_err(|err| restore_err(err.to_string()))?;
        let model = model.load_record(record);

        let record = Recorder::<B>::load::<O::Record>(&self.recorder, self.optimizer_path(step), device)
            .map_err(|err| restore_err(err.to_string()))?;
        let optimizer = optimizer.load_record(record);

        Ok((model, optimizer, state))
    }
}
