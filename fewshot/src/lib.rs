//! Few-shot glyph classification: decides whether a query image shows the same character as a
//! handful of example images.

pub mod catalog;
pub mod config;
pub mod driver;
pub mod encoder;
mod error;
pub mod model;
pub mod pretrain;
pub mod sampler;
pub mod store;
pub mod trainer;

pub use error::{Context, FewShotErr, Result};
