use burn::{
    config::Config,
    module::AutodiffModule,
    optim::{adaptor::OptimizerAdaptor, Adam, AdamConfig, GradientsParams, Optimizer},
    tensor::{
        backend::{AutodiffBackend, Backend},
        Tensor,
    },
};
use std::fs;
use tracing::{error, info, warn};

use crate::{
    checkpoint::{CheckpointState, CheckpointStore},
    config::TrainingConfig,
    data::{BatchSource, ImageFolderSource, IMAGE_CHANNELS},
    error::{Result, TrainError},
    loss::{LossComposer, LossValues},
    model::{generator::GeneratorConfig, vgg19::Vgg19, FeatureExtractor, StyleGenerator},
    normalize::Normalizer,
    style::StyleSignature,
    summary::SummaryWriter,
};

// ////////////////////////////////////////////////////////////////////////////
// Helpers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerPhase {
    Uninitialized,
    GraphBuilt,
    Running,
    Checkpointing,
    Shutdown,
}

/// Trainable parameters and the number of optimizer updates applied to them.
#[derive(Debug, Clone)]
pub struct TrainingState<M> {
    pub generator: M,
    pub global_step: usize,
}

#[derive(Debug, Clone)]
pub struct StepOutput<B: Backend> {
    /// Iteration index, i.e. the global step before this update.
    pub step: usize,
    pub losses: LossValues,
    /// Raw generator output, detached.
    pub generated: Tensor<B, 4>,
    /// The sourced batch before normalization.
    pub original: Tensor<B, 4>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    pub steps_run: usize,
    pub global_step: usize,
    pub last_losses: Option<LossValues>,
    pub last_checkpoint: Option<usize>,
}

// ////////////////////////////////////////////////////////////////////////////
// Trainer
/// Owns the generator, its optimizer and every collaborator of the loop.
///
/// Built once, then stepped repeatedly. Background data workers are stopped on
/// every exit path, including errors and drop.
pub struct Trainer<B, G, E, S>
where
    B: AutodiffBackend,
    G: StyleGenerator<B> + AutodiffModule<B>,
    E: FeatureExtractor<B>,
    S: BatchSource,
{
    config: TrainingConfig,
    device: B::Device,
    normalizer: Normalizer,
    extractor: E,
    composer: LossComposer<B>,
    source: S,
    optimizer: OptimizerAdaptor<Adam, G, B>,
    state: TrainingState<G>,
    checkpoints: CheckpointStore,
    summary: SummaryWriter,
    phase: TrainerPhase,
    last_checkpoint: Option<usize>,
}

impl<B, G, E, S> Trainer<B, G, E, S>
where
    B: AutodiffBackend,
    G: StyleGenerator<B> + AutodiffModule<B>,
    E: FeatureExtractor<B>,
    S: BatchSource,
{
    /// Validate the pipeline, compute the style signature and prepare the
    /// output directories. Nothing is trained and no worker is started.
    pub fn build(
        config: TrainingConfig,
        generator: G,
        extractor: E,
        source: S,
        device: B::Device,
    ) -> Result<Self> {
        let normalizer = Normalizer::new(&config);
        normalizer.check_channels(IMAGE_CHANNELS)?;

        let model_dir = config.model_dir();
        fs::create_dir_all(&model_dir)?;
        config.save(model_dir.join("config.json"))?;

        let signature = StyleSignature::compute(&config, &normalizer, &extractor, &device)?;
        let composer = LossComposer::new(&config, signature);

        let checkpoints = CheckpointStore::new(&model_dir)?;
        let summary = SummaryWriter::new(config.summary_dir())?;
        let optimizer = AdamConfig::new().init::<B, G>();

        info!(
            "pipeline built: content layers {:?}, style layers {:?}, weights (content {}, style {}, tv {})",
            config.content_layers,
            config.style_layers,
            config.content_weight,
            config.style_weight,
            config.tv_weight
        );

        Ok(Self {
            config,
            device,
            normalizer,
            extractor,
            composer,
            source,
            optimizer,
            state: TrainingState {
                generator,
                global_step: 0,
            },
            checkpoints,
            summary,
            phase: TrainerPhase::GraphBuilt,
            last_checkpoint: None,
        })
    }

    pub fn phase(&self) -> TrainerPhase {
        self.phase
    }

    pub fn global_step(&self) -> usize {
        self.state.global_step
    }

    pub fn state(&self) -> &TrainingState<G> {
        &self.state
    }

    pub fn composer(&self) -> &LossComposer<B> {
        &self.composer
    }

    /// Register auxiliary losses before training starts.
    pub fn composer_mut(&mut self) -> &mut LossComposer<B> {
        &mut self.composer
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    fn expect_phase(&self, expected: TrainerPhase) -> Result<()> {
        if self.phase != expected {
            return Err(TrainError::InvalidPhase {
                expected,
                actual: self.phase,
            });
        }
        Ok(())
    }

    /// Restore from the latest checkpoint when finetuning, then start the
    /// data workers.
    pub fn start(&mut self) -> Result<()> {
        self.expect_phase(TrainerPhase::GraphBuilt)?;

        if let Err(err) = self.restore_and_start() {
            self.shutdown();
            return Err(err);
        }

        self.phase = TrainerPhase::Running;
        Ok(())
    }

    fn restore_and_start(&mut self) -> Result<()> {
        info!(
            "generator has {} trainable parameters",
            self.state.generator.num_params()
        );

        if self.config.finetune {
            match self.checkpoints.latest()? {
                Some(step) => {
                    info!(
                        "restoring model from step {} in {:?}",
                        step,
                        self.checkpoints.dir()
                    );
                    let optimizer =
                        std::mem::replace(&mut self.optimizer, AdamConfig::new().init());
                    let (generator, optimizer, state) = self.checkpoints.load(
                        step,
                        self.state.generator.clone(),
                        optimizer,
                        &self.device,
                    )?;

                    self.optimizer = optimizer;
                    self.state = TrainingState {
                        generator,
                        global_step: state.global_step,
                    };
                    self.last_checkpoint = Some(step);
                }
                None => warn!(
                    "no checkpoint in {:?}, training from scratch",
                    self.checkpoints.dir()
                ),
            }
        }

        self.source.start()
    }

    /// One optimizer update on the next batch.
    pub fn step(&mut self) -> Result<StepOutput<B>> {
        self.expect_phase(TrainerPhase::Running)?;
        let step = self.state.global_step;

        let batch = self.source.next_batch()?;
        let original = batch.to_tensor::<B>(&self.device);
        let images = self.normalizer.normalize(original.clone())?;

        let generated = self.state.generator.infer(images.clone());
        let preprocessed = self.normalizer.normalize(generated.clone())?;

        // one extractor pass over generated ++ original
        let joined = Tensor::cat(vec![preprocessed, images], 0);
        let activations = self.extractor.extract(joined, self.composer.layers())?;
        let losses = self.composer.compose(&activations, generated.clone())?;

        let values = losses.values();
        if !values.total.is_finite() {
            error!("model with loss {} at step {}", values.total, step);
            return Err(TrainError::Divergence {
                step,
                loss: values.total,
            });
        }

        let grads = losses.total.backward();
        let grads = GradientsParams::from_grads(grads, &self.state.generator);
        self.state.generator =
            self.optimizer
                .step(self.config.lr, self.state.generator.clone(), grads);
        self.state.global_step += 1;

        Ok(StepOutput {
            step,
            losses: values,
            generated: generated.detach(),
            original,
        })
    }

    /// Apply `max_iter` updates, continuing the step counter of a restored
    /// checkpoint, then shut down.
    pub fn run(&mut self) -> Result<TrainingReport> {
        if self.phase == TrainerPhase::GraphBuilt {
            self.start()?;
        }

        let result = self.run_loop();
        if let Err(err) = &result {
            error!("training stopped: {}", err);
        }
        self.shutdown();
        result
    }

    fn run_loop(&mut self) -> Result<TrainingReport> {
        self.expect_phase(TrainerPhase::Running)?;
        let first_step = self.state.global_step;
        let last_step = first_step + self.config.max_iter;
        let mut last_output = None;

        while self.state.global_step < last_step {
            let output = self.step()?;

            if output.step % self.config.display == 0 {
                let losses = &output.losses;
                info!(
                    "{}[iterations], content_loss {:.5}, style_loss {:.5}, tv_loss {:.5}, train loss {:.5}",
                    output.step,
                    losses.weighted_content,
                    losses.weighted_style,
                    losses.weighted_tv,
                    losses.total
                );
            }

            if self.state.global_step % self.config.snapshot == 0 {
                self.checkpoint(&output)?;
            }
            last_output = Some(output);
        }

        if let Some(output) = &last_output {
            if self.last_checkpoint != Some(self.state.global_step) {
                self.checkpoint(output)?;
            }
        }

        info!("done after {} steps", self.state.global_step - first_step);
        Ok(TrainingReport {
            steps_run: self.state.global_step - first_step,
            global_step: self.state.global_step,
            last_losses: last_output.map(|output| output.losses),
            last_checkpoint: self.last_checkpoint,
        })
    }

    fn checkpoint(&mut self, output: &StepOutput<B>) -> Result<()> {
        self.phase = TrainerPhase::Checkpointing;
        let step = self.state.global_step;
        info!("adding summary and saving snapshot at step {}", step);

        let state = CheckpointState {
            global_step: step,
            total_loss: Some(output.losses.total),
        };
        self.checkpoints
            .save(&state, &self.state.generator, &self.optimizer)?;

        self.summary.add_scalars(step, &output.losses)?;
        self.summary
            .add_images(step, "generated", output.generated.clone())?;
        self.summary
            .add_images(step, "original", output.original.clone())?;
        self.summary.flush()?;

        self.last_checkpoint = Some(step);
        self.phase = TrainerPhase::Running;
        Ok(())
    }

    /// Stop the data workers and wait for them. Idempotent.
    pub fn shutdown(&mut self) {
        if self.phase == TrainerPhase::Shutdown {
            return;
        }

        self.source.shutdown();
        if let Err(err) = self.summary.flush() {
            warn!("failed to flush summary: {}", err);
        }
        self.phase = TrainerPhase::Shutdown;
        info!("data workers stopped");
    }
}

impl<B, G, E, S> Drop for Trainer<B, G, E, S>
where
    B: AutodiffBackend,
    G: StyleGenerator<B> + AutodiffModule<B>,
    E: FeatureExtractor<B>,
    S: BatchSource,
{
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Train the default generator against pretrained VGG19 features on the
/// images of `config.train_dir`.
pub fn train<B: AutodiffBackend>(config: TrainingConfig, device: B::Device) -> Result<TrainingReport> {
    let extractor = Vgg19::<B>::from_file(&config.feature_path, &device)?;
    let generator = GeneratorConfig::new().init::<B>(&device);
    let source = ImageFolderSource::new(&config)?;
    info!(
        "training on {} images from {:?}",
        source.num_images(),
        config.train_dir
    );

    let mut trainer = Trainer::build(config, generator, extractor, source, device)?;
    trainer.run()
}
