//! # rb-hist
//!
//! Histogram value type, structured histogram-key codec, samples registry,
//! and the on-disk template-collection format.

#![warn(missing_docs)]

mod collection;
mod histogram;
pub mod key;
mod registry;

pub use collection::TemplateSet;
pub use histogram::Histogram;
pub use key::{parse_key, Category, Group, Lepton, ParsedKey, Shift, SystTag};
pub use registry::{ControlRegionBins, SampleRegistry};
