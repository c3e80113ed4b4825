//! Model module for the quasi-siamese network using the Burn framework
//!
//! The network looks at a before image and an after image through two
//! convolutional branches with separate weights and maps the concatenated
//! features to a damage score (regression) or damage-class logits
//! (classification).

pub mod siamese;

pub use siamese::{ConvBlock, SiameseNetwork, SiameseNetworkConfig};

/// Number of input channels (RGB)
pub const INPUT_CHANNELS: usize = 3;
