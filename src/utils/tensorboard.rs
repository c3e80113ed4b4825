//! Scalar metric sinks
//!
//! The orchestrators report per-epoch scalars through [`MetricsSink`]. The
//! binary writes them as TensorBoard event files; tests collect them in a
//! [`MemorySink`].

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::BytesMut;
use crc32fast::Hasher as Crc32;
use prost::Message;
use tracing::{debug, warn};

use crate::utils::error::{Result, SiameseError};

/// Receiver of tagged scalar series
pub trait MetricsSink {
    fn add_scalar(&mut self, tag: &str, value: f64, step: usize) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Discards every scalar
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl MetricsSink for NullSink {
    fn add_scalar(&mut self, _tag: &str, _value: f64, _step: usize) -> Result<()> {
        Ok(())
    }
}

/// One recorded scalar
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarRecord {
    pub tag: String,
    pub value: f64,
    pub step: usize,
}

/// In-memory sink whose clones share the same record list
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<ScalarRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ScalarRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// Values of one tag in the order they were added
    pub fn series(&self, tag: &str) -> Vec<f64> {
        self.records()
            .into_iter()
            .filter(|r| r.tag == tag)
            .map(|r| r.value)
            .collect()
    }
}

impl MetricsSink for MemorySink {
    fn add_scalar(&mut self, tag: &str, value: f64, step: usize) -> Result<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| SiameseError::InvalidInput("metrics sink lock poisoned".to_string()))?;
        records.push(ScalarRecord {
            tag: tag.to_string(),
            value,
            step,
        });
        Ok(())
    }
}

/// TensorBoard event file writer
pub struct TensorBoardWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    flush_every: usize,
    pending: usize,
}

impl TensorBoardWriter {
    /// Create `events.out.tfevents.<time>.<host>` inside `dir`
    pub fn create(dir: &Path, flush_every: usize) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let filename = format!("events.out.tfevents.{}.{}", unix_timestamp(), hostname());
        let path = dir.join(filename);
        let file = File::create(&path)?;
        debug!("Writing TensorBoard events to {:?}", path);

        let mut writer = Self {
            path,
            writer: BufWriter::new(file),
            flush_every: flush_every.max(1),
            pending: 0,
        };
        writer.write_event(&Event {
            wall_time: wall_time(),
            step: 0,
            file_version: Some("brain.Event:2".to_string()),
            summary: None,
        })?;
        writer.flush()?;
        Ok(writer)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_event(&mut self, event: &Event) -> Result<()> {
        let mut buffer = BytesMut::with_capacity(128);
        event
            .encode(&mut buffer)
            .map_err(|e| SiameseError::Serialization(format!("tensorboard event: {}", e)))?;
        let data = buffer.freeze();

        let len_bytes = (data.len() as u64).to_le_bytes();
        self.writer.write_all(&len_bytes)?;
        self.writer.write_all(&masked_crc32(&len_bytes).to_le_bytes())?;
        self.writer.write_all(&data)?;
        self.writer.write_all(&masked_crc32(&data).to_le_bytes())?;

        self.pending += 1;
        if self.pending >= self.flush_every {
            MetricsSink::flush(self)?;
        }
        Ok(())
    }
}

impl MetricsSink for TensorBoardWriter {
    fn add_scalar(&mut self, tag: &str, value: f64, step: usize) -> Result<()> {
        self.write_event(&Event {
            wall_time: wall_time(),
            step: step as i64,
            file_version: None,
            summary: Some(Summary {
                value: vec![summary::Value {
                    tag: tag.to_string(),
                    simple_value: Some(value as f32),
                }],
            }),
        })
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.pending = 0;
        Ok(())
    }
}

impl Drop for TensorBoardWriter {
    fn drop(&mut self) {
        if let Err(err) = MetricsSink::flush(self) {
            warn!("Failed to flush TensorBoard events: {}", err);
        }
    }
}

fn masked_crc32(data: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(data);
    let crc = hasher.finalize();
    ((crc >> 15) | (crc << 17)).wrapping_add(0xa282_ead8)
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn wall_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "localhost".to_string())
}

#[derive(Clone, PartialEq, Message)]
struct Event {
    #[prost(double, tag = "1")]
    wall_time: f64,
    #[prost(int64, tag = "2")]
    step: i64,
    #[prost(string, optional, tag = "3")]
    file_version: Option<String>,
    #[prost(message, optional, tag = "5")]
    summary: Option<Summary>,
}

#[derive(Clone, PartialEq, Message)]
struct Summary {
    #[prost(message, repeated, tag = "1")]
    value: Vec<summary::Value>,
}

mod summary {
    use prost::Message;

    #[derive(Clone, PartialEq, Message)]
    pub struct Value {
        #[prost(string, tag = "1")]
        pub tag: String,
        #[prost(float, optional, tag = "2")]
        pub simple_value: Option<f32>,
    }
}
