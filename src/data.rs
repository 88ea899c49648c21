use burn::prelude::*;
use crossbeam_channel::{bounded, Receiver, Sender};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
};
use tracing::{debug, error, warn};
use walkdir::WalkDir;

use crate::{
    config::TrainingConfig,
    error::{Result, TrainError},
    utils::{images_to_batch, load_image},
};

/// Images are always decoded to RGB.
pub const IMAGE_CHANNELS: usize = 3;

// ////////////////////////////////////////////////////////////////////////////
// Batch
/// Decoded pixels laid out as `[batch, height, width, channels]`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBatch {
    pixels: Vec<u8>,
    shape: [usize; 4],
}

impl RawBatch {
    pub fn new(pixels: Vec<u8>, shape: [usize; 4]) -> Self {
        debug_assert_eq!(pixels.len(), shape.iter().product::<usize>());
        Self { pixels, shape }
    }

    pub fn shape(&self) -> [usize; 4] {
        self.shape
    }

    pub fn channels(&self) -> usize {
        self.shape[3]
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 4> {
        let values = self.pixels.iter().map(|&p| p as f32).collect::<Vec<_>>();
        Tensor::from_data(TensorData::new(values, self.shape), device)
    }
}

// ////////////////////////////////////////////////////////////////////////////
// Source
/// Blocking supplier of training batches.
pub trait BatchSource {
    /// Start any background producers.
    fn start(&mut self) -> Result<()>;

    /// Block until the next batch is available.
    fn next_batch(&mut self) -> Result<RawBatch>;

    /// Stop producers and wait for them to exit. Safe to call repeatedly.
    fn shutdown(&mut self);
}

/// Endless stream of batches decoded from an image directory by a pool of
/// worker threads feeding a bounded queue.
pub struct ImageFolderSource {
    root: PathBuf,
    files: Arc<Vec<PathBuf>>,
    width: usize,
    height: usize,
    batch_size: usize,
    num_workers: usize,
    capacity: usize,
    seed: u64,
    stop: Arc<AtomicBool>,
    receiver: Option<Receiver<Result<RawBatch>>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl ImageFolderSource {
    pub fn new(config: &TrainingConfig) -> Result<Self> {
        let root = PathBuf::from(&config.train_dir);
        let files = discover_images(&root);
        if files.is_empty() {
            return Err(TrainError::NoUsableImages(root));
        }
        debug!("found {} images under {:?}", files.len(), root);

        Ok(Self {
            root,
            files: Arc::new(files),
            width: config.width,
            height: config.height,
            batch_size: config.batch_size,
            num_workers: config.num_workers,
            capacity: config.queue_capacity,
            seed: config.seed,
            stop: Arc::new(AtomicBool::new(false)),
            receiver: None,
            workers: Vec::new(),
        })
    }

    pub fn num_images(&self) -> usize {
        self.files.len()
    }

    /// Number of worker threads not yet joined.
    pub fn live_workers(&self) -> usize {
        self.workers.len()
    }
}

impl BatchSource for ImageFolderSource {
    fn start(&mut self) -> Result<()> {
        if self.receiver.is_some() {
            return Ok(());
        }

        self.stop.store(false, Ordering::SeqCst);
        let (sender, receiver) = bounded(self.capacity);
        for id in 0..self.num_workers {
            let worker = Worker {
                id,
                root: self.root.clone(),
                files: self.files.clone(),
                width: self.width,
                height: self.height,
                batch_size: self.batch_size,
                seed: self.seed.wrapping_add(id as u64),
                stop: self.stop.clone(),
                sender: sender.clone(),
            };
            let handle = thread::Builder::new()
                .name(format!("image-worker-{id}"))
                .spawn(move || worker.run())?;
            self.workers.push(handle);
        }
        self.receiver = Some(receiver);

        Ok(())
    }

    fn next_batch(&mut self) -> Result<RawBatch> {
        let receiver = self.receiver.as_ref().ok_or(TrainError::SourceClosed)?;
        receiver.recv().map_err(|_| TrainError::SourceClosed)?
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        // wakes workers blocked on a full queue
        self.receiver.take();

        for handle in self.workers.drain(..) {
            let name = handle.thread().name().unwrap_or("image-worker").to_string();
            if handle.join().is_err() {
                error!("{name} panicked");
            }
        }
    }
}

impl Drop for ImageFolderSource {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker {
    id: usize,
    root: PathBuf,
    files: Arc<Vec<PathBuf>>,
    width: usize,
    height: usize,
    batch_size: usize,
    seed: u64,
    stop: Arc<AtomicBool>,
    sender: Sender<Result<RawBatch>>,
}

impl Worker {
    fn run(self) {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut order = (0..self.files.len()).collect::<Vec<_>>();
        let mut pending = Vec::with_capacity(self.batch_size);

        while !self.stop.load(Ordering::SeqCst) {
            order.shuffle(&mut rng);
            let mut decoded = 0usize;

            for &index in &order {
                if self.stop.load(Ordering::SeqCst) {
                    return;
                }

                match load_image(&self.files[index], self.width, self.height) {
                    Ok(image) => {
                        decoded += 1;
                        pending.push(image);
                    }
                    Err(err) => {
                        warn!("worker {} skipping sample: {}", self.id, err);
                        continue;
                    }
                }

                if pending.len() == self.batch_size {
                    let batch = images_to_batch(&pending);
                    pending.clear();
                    if self.sender.send(Ok(batch)).is_err() {
                        return;
                    }
                }
            }

            if decoded == 0 {
                let _ = self
                    .sender
                    .send(Err(TrainError::NoUsableImages(self.root.clone())));
                return;
            }
        }
    }
}

/// Recursively collect jpg/jpeg/png files, sorted for reproducibility.
pub fn discover_images<P: AsRef<Path>>(root: P) -> Vec<PathBuf> {
    let mut files = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
                .unwrap_or(false)
        })
        .collect::<Vec<_>>();
    files.sort();
    files
}
