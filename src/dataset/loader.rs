//! Split loading and batch iteration
//!
//! [`Datasets`] reads one split directory into [`PairRecord`]s and wraps
//! them in a [`PairLoader`]. The loader yields batches in a fixed order (a
//! seeded per-epoch shuffle for training) and decodes the images of each
//! batch in parallel without changing their order.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use burn::data::dataloader::batcher::Batcher;
use burn::tensor::backend::Backend;
use indicatif::{ProgressBar, ProgressStyle};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::{Head, OutputType, RunConfig};
use crate::dataset::burn_dataset::{PairBatch, PairBatcher, PairDataset, PairRecord};
use crate::dataset::{Phase, LABELS_FILE};
use crate::utils::error::{Result, ResultExt, SiameseError};

/// Access to the splits under a data directory
#[derive(Debug, Clone)]
pub struct Datasets {
    root: PathBuf,
    head: Head,
    image_size: usize,
    batch_size: usize,
    seed: u64,
}

impl Datasets {
    pub fn new(root: impl Into<PathBuf>, head: Head, image_size: usize, batch_size: usize) -> Self {
        Self {
            root: root.into(),
            head,
            image_size,
            batch_size,
            seed: 0,
        }
    }

    pub fn from_config(config: &RunConfig) -> Self {
        Self::new(
            &config.data_path,
            config.head(),
            config.input_size,
            config.batch_size,
        )
        .with_seed(config.seed)
    }

    /// Seed of the per-epoch training shuffle
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn split_dir(&self, phase: Phase) -> PathBuf {
        self.root.join(phase.as_str())
    }

    /// Sample set and batch iterator of a split
    pub fn load(&self, phase: Phase) -> Result<(Arc<PairDataset>, PairLoader)> {
        let records = self.records(phase)?;
        info!(
            "Loaded {} pairs for split '{}' from {:?}",
            records.len(),
            phase,
            self.split_dir(phase)
        );

        let dataset = Arc::new(PairDataset::new(records, self.image_size));
        let mut loader = PairLoader::new(Arc::clone(&dataset), self.batch_size);
        if phase == Phase::Train {
            loader = loader.shuffled(self.seed);
        }
        Ok((dataset, loader))
    }

    /// Labels of a labeled split, without touching the images
    pub fn labels(&self, phase: Phase) -> Result<Vec<f32>> {
        if !phase.is_labeled() {
            return Err(SiameseError::Config(format!(
                "split '{}' has no labels",
                phase
            )));
        }
        let dir = self.split_dir(phase);
        Ok(read_labels(&dir.join(LABELS_FILE), self.head)?
            .into_iter()
            .map(|(_, label)| label)
            .collect())
    }

    /// Records of a split with every image path checked
    pub fn records(&self, phase: Phase) -> Result<Vec<PairRecord>> {
        let dir = self.split_dir(phase);
        if !dir.is_dir() {
            return Err(SiameseError::PathNotFound(dir));
        }

        let entries: Vec<(String, Option<f32>)> = if phase.is_labeled() {
            read_labels(&dir.join(LABELS_FILE), self.head)?
                .into_iter()
                .map(|(name, label)| (name, Some(label)))
                .collect()
        } else {
            list_filenames(&dir.join("before"))?
                .into_iter()
                .map(|name| (name, None))
                .collect()
        };

        let progress = ProgressBar::new(entries.len() as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("  {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            progress.set_style(style.progress_chars("#>-"));
        }
        progress.set_message(phase.as_str());

        let mut records = Vec::with_capacity(entries.len());
        for (filename, label) in entries {
            let before = dir.join("before").join(&filename);
            let after = dir.join("after").join(&filename);
            for path in [&before, &after] {
                if !path.is_file() {
                    progress.abandon();
                    return Err(SiameseError::Dataset(format!(
                        "missing image {:?} for '{}' in split '{}'",
                        path, filename, phase
                    )));
                }
            }
            records.push(PairRecord {
                filename,
                before,
                after,
                label,
            });
            progress.inc(1);
        }
        progress.finish_and_clear();

        Ok(records)
    }
}

/// Parse `<filename> <label>` lines, skipping blanks and `#` comments
fn read_labels(path: &Path, head: Head) -> Result<Vec<(String, f32)>> {
    if !path.is_file() {
        return Err(SiameseError::PathNotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read labels from {:?}", path))?;

    let mut labels = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let malformed = |reason: &str| {
            SiameseError::Dataset(format!(
                "{:?} line {}: {} ('{}')",
                path,
                line_no + 1,
                reason,
                line
            ))
        };

        let mut parts = line.split_whitespace();
        let (filename, raw) = match (parts.next(), parts.next(), parts.next()) {
            (Some(filename), Some(raw), None) => (filename, raw),
            _ => return Err(malformed("expected '<filename> <label>'")),
        };
        let label: f32 = raw.parse().map_err(|_| malformed("label is not a number"))?;
        if !label.is_finite() {
            return Err(malformed("label is not finite"));
        }

        match head.output_type {
            OutputType::Classification => {
                if label.fract() != 0.0 || label < 0.0 || label as usize >= head.n_classes {
                    return Err(malformed(&format!(
                        "class id must be an integer in [0, {})",
                        head.n_classes
                    )));
                }
            }
            OutputType::Regression => {
                if !(0.0..=1.0).contains(&label) {
                    warn!("{:?} line {}: label {} outside [0, 1]", path, line_no + 1, label);
                }
            }
        }

        labels.push((filename.to_string(), label));
    }

    debug!("Read {} labels from {:?}", labels.len(), path);
    Ok(labels)
}

/// Sorted file names directly inside a directory
fn list_filenames(dir: &Path) -> Result<Vec<String>> {
    if !dir.is_dir() {
        return Err(SiameseError::PathNotFound(dir.to_path_buf()));
    }

    let mut names: Vec<String> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .collect();
    names.sort();
    Ok(names)
}

/// Batch iterator over a [`PairDataset`]
#[derive(Debug, Clone)]
pub struct PairLoader {
    dataset: Arc<PairDataset>,
    batcher: PairBatcher,
    batch_size: usize,
    shuffle_seed: Option<u64>,
}

impl PairLoader {
    pub fn new(dataset: Arc<PairDataset>, batch_size: usize) -> Self {
        let batcher = PairBatcher::new(dataset.image_size());
        Self {
            dataset,
            batcher,
            batch_size: batch_size.max(1),
            shuffle_seed: None,
        }
    }

    /// Shuffle each epoch with a ChaCha8 stream seeded by `seed + epoch`
    pub fn shuffled(mut self, seed: u64) -> Self {
        self.shuffle_seed = Some(seed);
        self
    }

    /// Number of batches per pass
    pub fn num_batches(&self) -> usize {
        self.dataset.records().len().div_ceil(self.batch_size)
    }

    pub fn num_samples(&self) -> usize {
        self.dataset.records().len()
    }

    /// Sample order of one epoch
    pub fn order(&self, epoch: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.num_samples()).collect();
        if let Some(seed) = self.shuffle_seed {
            let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(epoch as u64));
            order.shuffle(&mut rng);
        }
        order
    }

    /// Batches of one epoch on `device`
    pub fn iter<B: Backend>(&self, epoch: usize, device: &B::Device) -> PairBatches<'_, B> {
        PairBatches {
            loader: self,
            order: self.order(epoch),
            position: 0,
            device: device.clone(),
        }
    }
}

/// Iterator returned by [`PairLoader::iter`]
pub struct PairBatches<'a, B: Backend> {
    loader: &'a PairLoader,
    order: Vec<usize>,
    position: usize,
    device: B::Device,
}

impl<B: Backend> Iterator for PairBatches<'_, B> {
    type Item = Result<PairBatch<B>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.order.len() {
            return None;
        }
        let end = (self.position + self.loader.batch_size).min(self.order.len());
        let indices = &self.order[self.position..end];
        self.position = end;

        let items: Result<Vec<_>> = indices
            .par_iter()
            .map(|&index| self.loader.dataset.load_item(index))
            .collect();

        Some(items.map(|items| self.loader.batcher.batch(items, &self.device)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.order.len() - self.position).div_ceil(self.loader.batch_size);
        (remaining, Some(remaining))
    }
}
