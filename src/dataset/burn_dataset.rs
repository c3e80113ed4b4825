//! Burn Dataset Integration for image pairs
//!
//! `PairDataset` holds the records of one split and decodes images lazily,
//! returning decode failures to the caller; `PairBatcher` stacks decoded
//! pairs into normalised `[batch, 3, H, W]` tensors.

use std::path::{Path, PathBuf};

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use image::imageops::FilterType;
use image::ImageReader;
use serde::{Deserialize, Serialize};

use crate::dataset::{IMAGENET_MEAN, IMAGENET_STD};
use crate::utils::error::{Result, SiameseError};

/// One sample of a split before its images are decoded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairRecord {
    /// Identifier written to prediction files
    pub filename: String,
    pub before: PathBuf,
    pub after: PathBuf,
    /// `None` for inference samples
    pub label: Option<f32>,
}

/// A decoded image pair ready for batching
#[derive(Clone, Debug)]
pub struct PairItem {
    pub filename: String,
    /// Before image as flattened CHW floats in [0, 1]
    pub image1: Vec<f32>,
    /// After image as flattened CHW floats in [0, 1]
    pub image2: Vec<f32>,
    pub label: Option<f32>,
}

impl PairItem {
    /// Decode both images of a record
    pub fn load(record: &PairRecord, image_size: usize) -> Result<Self> {
        Ok(Self {
            filename: record.filename.clone(),
            image1: load_chw(&record.before, image_size)?,
            image2: load_chw(&record.after, image_size)?,
            label: record.label,
        })
    }
}

/// Decode, resize and convert an image to CHW floats in [0, 1]
fn load_chw(path: &Path, image_size: usize) -> Result<Vec<f32>> {
    let img = ImageReader::open(path)
        .map_err(|e| SiameseError::ImageLoad(path.to_path_buf(), e.to_string()))?
        .decode()
        .map_err(|e| SiameseError::ImageLoad(path.to_path_buf(), e.to_string()))?
        .resize_exact(image_size as u32, image_size as u32, FilterType::Triangle)
        .to_rgb8();

    let plane = image_size * image_size;
    let mut image = vec![0.0f32; 3 * plane];

    for (x, y, pixel) in img.enumerate_pixels() {
        let offset = y as usize * image_size + x as usize;
        for channel in 0..3 {
            image[channel * plane + offset] = pixel[channel] as f32 / 255.0;
        }
    }

    Ok(image)
}

/// Image pairs of one split, decoded on demand
#[derive(Debug, Clone)]
pub struct PairDataset {
    records: Vec<PairRecord>,
    image_size: usize,
}

impl PairDataset {
    pub fn new(records: Vec<PairRecord>, image_size: usize) -> Self {
        Self {
            records,
            image_size,
        }
    }

    pub fn records(&self) -> &[PairRecord] {
        &self.records
    }

    pub fn image_size(&self) -> usize {
        self.image_size
    }

    /// Decode one item, surfacing decode errors
    pub fn load_item(&self, index: usize) -> Result<PairItem> {
        let record = self.records.get(index).ok_or_else(|| {
            SiameseError::Dataset(format!(
                "index {} out of range for {} records",
                index,
                self.records.len()
            ))
        })?;
        PairItem::load(record, self.image_size)
    }
}

/// A batch of image pairs
#[derive(Clone, Debug)]
pub struct PairBatch<B: Backend> {
    pub filenames: Vec<String>,
    /// Before images with shape [batch_size, 3, height, width]
    pub image1: Tensor<B, 4>,
    /// After images with shape [batch_size, 3, height, width]
    pub image2: Tensor<B, 4>,
    /// Host-side labels; `None` when the batch is unlabeled
    pub labels: Option<Vec<f32>>,
}

/// Batcher stacking pairs into ImageNet-normalised tensors
#[derive(Clone, Debug)]
pub struct PairBatcher {
    image_size: usize,
}

impl PairBatcher {
    pub fn new(image_size: usize) -> Self {
        Self { image_size }
    }

    fn stack<B: Backend>(
        &self,
        data: Vec<f32>,
        batch_size: usize,
        device: &B::Device,
    ) -> Tensor<B, 4> {
        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(data, [batch_size, 3, self.image_size, self.image_size]),
            device,
        );

        // (x - mean) / std per channel
        let mean = Tensor::<B, 4>::from_floats(
            TensorData::new(IMAGENET_MEAN.to_vec(), [1, 3, 1, 1]),
            device,
        );
        let std = Tensor::<B, 4>::from_floats(
            TensorData::new(IMAGENET_STD.to_vec(), [1, 3, 1, 1]),
            device,
        );

        (images - mean) / std
    }
}

impl<B: Backend> Batcher<B, PairItem, PairBatch<B>> for PairBatcher {
    fn batch(&self, items: Vec<PairItem>, device: &B::Device) -> PairBatch<B> {
        let batch_size = items.len();
        let per_image = 3 * self.image_size * self.image_size;

        let mut before = Vec::with_capacity(batch_size * per_image);
        let mut after = Vec::with_capacity(batch_size * per_image);
        let mut filenames = Vec::with_capacity(batch_size);
        let mut labels = Vec::with_capacity(batch_size);

        for item in items {
            before.extend(item.image1);
            after.extend(item.image2);
            filenames.push(item.filename);
            labels.push(item.label);
        }

        PairBatch {
            filenames,
            image1: self.stack(before, batch_size, device),
            image2: self.stack(after, batch_size, device),
            labels: labels.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use image::{Rgb, RgbImage};
    use tempfile::tempdir;

    type TestBackend = NdArray;

    fn write_png(path: &Path, color: [u8; 3]) {
        RgbImage::from_pixel(12, 10, Rgb(color)).save(path).unwrap();
    }

    fn record(dir: &Path, name: &str, label: Option<f32>) -> PairRecord {
        let before = dir.join(format!("before_{}", name));
        let after = dir.join(format!("after_{}", name));
        write_png(&before, [255, 0, 0]);
        write_png(&after, [0, 0, 255]);
        PairRecord {
            filename: name.to_string(),
            before,
            after,
            label,
        }
    }

    #[test]
    fn test_item_is_resized_chw() {
        let dir = tempdir().unwrap();
        let item = PairItem::load(&record(dir.path(), "a.png", Some(1.0)), 8).unwrap();

        assert_eq!(item.image1.len(), 3 * 8 * 8);
        // Red before image: first plane is 1, blue plane is 0
        assert!((item.image1[0] - 1.0).abs() < 1e-6);
        assert_eq!(item.image1[2 * 64], 0.0);
        assert!((item.image2[2 * 64] - 1.0).abs() < 1e-6);
        assert_eq!(item.label, Some(1.0));
    }

    #[test]
    fn test_missing_image_is_image_load_error() {
        let dir = tempdir().unwrap();
        let missing = PairRecord {
            filename: "gone.png".to_string(),
            before: dir.path().join("gone.png"),
            after: dir.path().join("gone.png"),
            label: None,
        };
        let dataset = PairDataset::new(vec![missing], 8);

        assert!(matches!(dataset.load_item(0), Err(SiameseError::ImageLoad(_, _))));
        assert!(dataset.load_item(3).is_err());
    }

    #[test]
    fn test_batcher_shapes_and_normalisation() {
        let dir = tempdir().unwrap();
        let dataset = PairDataset::new(
            vec![
                record(dir.path(), "a.png", Some(0.0)),
                record(dir.path(), "b.png", Some(2.0)),
            ],
            8,
        );
        let items = vec![dataset.load_item(0).unwrap(), dataset.load_item(1).unwrap()];

        let device = Default::default();
        let batch: PairBatch<TestBackend> = PairBatcher::new(8).batch(items, &device);

        assert_eq!(batch.image1.dims(), [2, 3, 8, 8]);
        assert_eq!(batch.filenames, vec!["a.png", "b.png"]);
        assert_eq!(batch.labels, Some(vec![0.0, 2.0]));

        let values = batch.image1.into_data().to_vec::<f32>().unwrap();
        let expected = (1.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0];
        assert!((values[0] - expected).abs() < 1e-4);
    }

    #[test]
    fn test_unlabeled_batch_has_no_labels() {
        let dir = tempdir().unwrap();
        let dataset = PairDataset::new(vec![record(dir.path(), "a.png", None)], 8);
        let device = Default::default();
        let batch: PairBatch<TestBackend> =
            PairBatcher::new(8).batch(vec![dataset.load_item(0).unwrap()], &device);

        assert!(batch.labels.is_none());
        assert_eq!(batch.filenames, vec!["a.png"]);
    }
}
