pub mod aggregator;
pub mod artifact;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod export;
pub mod factors;
pub mod features;
pub mod glm;
pub mod logging;
pub mod model;
pub mod predict;
pub mod qualify;
pub mod records;
pub mod rolling;
pub mod scaling;
pub mod store;
pub mod training;
pub mod validation;
pub mod zip;

pub use error::{PipelineError, Result};
