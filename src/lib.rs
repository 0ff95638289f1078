//! Image-based meta-analysis over NIDM-Results packs.
//!
//! Each study's contrast, standard error and mask maps are located through its
//! provenance graph, harmonized into FSL's template space and scale, and
//! stacked by study id for a third-level mixed-effects model.

pub mod accumulator;
pub mod archive;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod group_model;
pub mod mask;
pub mod merge;
pub mod normalize;
pub mod output;
pub mod pipeline;
pub mod provenance;
pub mod variance;
