//! Tiny on-disk splits for the training tests

use std::fs;
use std::path::Path;

use image::{Rgb, RgbImage};

use crate::dataset::LABELS_FILE;

pub(crate) enum FixtureSplit {
    Labeled(Vec<String>),
    Unlabeled(usize),
}

impl FixtureSplit {
    pub(crate) fn classes(ids: &[usize]) -> Self {
        FixtureSplit::Labeled(ids.iter().map(|id| id.to_string()).collect())
    }

    pub(crate) fn values(values: &[f32]) -> Self {
        FixtureSplit::Labeled(values.iter().map(|v| format!("{:?}", v)).collect())
    }

    pub(crate) fn unlabeled(count: usize) -> Self {
        FixtureSplit::Unlabeled(count)
    }
}

/// Write `{root}/{split}` with 8x8 PNG pairs named `000.png`, `001.png`, ...
pub(crate) fn write_split(root: &Path, split: &str, fixture: FixtureSplit) {
    let dir = root.join(split);
    fs::create_dir_all(dir.join("before")).unwrap();
    fs::create_dir_all(dir.join("after")).unwrap();

    let count = match &fixture {
        FixtureSplit::Labeled(labels) => labels.len(),
        FixtureSplit::Unlabeled(count) => *count,
    };

    for index in 0..count {
        let name = format!("{:03}.png", index);
        let shade = (index * 37 % 256) as u8;
        RgbImage::from_pixel(8, 8, Rgb([shade, 128, 255 - shade]))
            .save(dir.join("before").join(&name))
            .unwrap();
        RgbImage::from_fn(8, 8, |x, y| Rgb([(x * 30) as u8, (y * 30) as u8, shade]))
            .save(dir.join("after").join(&name))
            .unwrap();
    }

    if let FixtureSplit::Labeled(labels) = fixture {
        let content: String = labels
            .iter()
            .enumerate()
            .map(|(index, label)| format!("{:03}.png {}\n", index, label))
            .collect();
        fs::write(dir.join(LABELS_FILE), content).unwrap();
    }
}
