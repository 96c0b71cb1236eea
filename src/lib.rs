//! Weekday/weekend classification of gridded urban flow data.
//!
//! The model is a fixed dual-branch network: a two-stage convolutional
//! extractor over (32, 32, 96) inflow/outflow grids, a dense extractor over
//! 19 auxiliary scalar covariates (weather, wind speed, ...), fused through
//! dense layers into a 2-way softmax. Training runs 10,000 Adam steps over
//! random minibatches with dropout and an L2 weight penalty, reporting
//! accuracy every 100 steps and checkpointing every 1,000.
//!
//! # Example
//!
//! ```no_run
//! use clasificar::data::{load::load_dataset, split::shuffle_split};
//! use clasificar::train::{TrainConfig, Trainer};
//!
//! # fn main() -> clasificar::Result<()> {
//! let raw = load_dataset("raw_data.safetensors")?;
//! let (train, test) = shuffle_split(&raw, 0.8, None)?;
//! let mut trainer = Trainer::new(TrainConfig::default(), train, test)?;
//! let summary = trainer.run()?;
//! println!("final test accuracy {:.4}", summary.test_accuracy);
//! # Ok(())
//! # }
//! ```

pub mod data;
pub mod error;
pub mod eval;
pub mod model;
pub mod nn;
pub mod optim;
pub mod train;

pub use error::{Error, Result};
