//! # rb-engine
//!
//! The binning-modification engine: per-channel statistical rebinning of
//! analysis templates plus layered systematic-shape construction (theory
//! symmetrization, bin-by-bin statistical shapes, μR/μF / parton-shower /
//! PDF envelopes, smoothing, per-year decorrelation).

#![warn(missing_docs)]

pub mod binning;
pub mod config;
mod engine;
pub mod shapes;
pub mod smooth;

pub use config::{
    BinningParams, EngineOptions, ScalePair, SmoothingAlgo, SystSource, SystematicsRegistry,
    Unit, VariableSpec,
};
pub use engine::{Engine, HistStore};
