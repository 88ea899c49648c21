use burn::prelude::*;
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use crate::{error::Result, loss::LossValues, utils::save_image};

/// One line of `events.jsonl`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SummaryEvent {
    pub step: usize,
    pub wall_time: u64,
    pub losses: LossValues,
}

/// Append-only diagnostics: scalar losses as JSON lines plus preview images.
pub struct SummaryWriter {
    dir: PathBuf,
    events: BufWriter<File>,
}

impl SummaryWriter {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let events = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("events.jsonl"))?;

        Ok(Self {
            dir,
            events: BufWriter::new(events),
        })
    }

    pub fn add_scalars(&mut self, step: usize, losses: &LossValues) -> Result<()> {
        let wall_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default();
        let event = SummaryEvent {
            step,
            wall_time,
            losses: *losses,
        };

        serde_json::to_writer(&mut self.events, &event)?;
        self.events.write_all(b"\n")?;
        Ok(())
    }

    /// Save raw `[batch, height, width, channels]` images as one grid per tag.
    pub fn add_images<B: Backend>(&self, step: usize, tag: &str, images: Tensor<B, 4>) -> Result<()> {
        let [count, ..] = images.dims();
        let nrow = (count as f32).sqrt().ceil() as usize;
        save_image(images, nrow, self.dir.join(format!("{tag}-{step}.png")))
    }

    pub fn flush(&mut self) -> Result<()> {
        self.events.flush()?;
        Ok(())
    }
}

impl Drop for SummaryWriter {
    fn drop(&mut self) {
        let _ = self.events.flush();
    }
}
