//! Reproducible training-data sampling for strong-lensing substructure
//!
//! This crate turns a declarative description of a lensing system into an
//! endless stream of (image, label) pairs. Every scalar parameter is declared
//! as a distribution record, drawn with a splittable generator key, and
//! normalized back against its record to produce labels. Rendering and halo
//! population are delegated to collaborator traits.

pub mod collaborators;
pub mod config;
pub mod cosmology;
pub mod distribution;
pub mod image;
pub mod param_tree;
pub mod rng_key;
pub mod sampler;
pub mod scene;
pub mod truth;

// Re-exports for easier access
pub use collaborators::{
    CollaboratorError, Collaborators, HaloPopulation, ImageRenderer, LineOfSightPopulator,
    RenderRequest, SubhaloPopulator,
};
pub use config::{
    ConfigError, DetectorConfig, InputConfig, ModelCatalog, PsfConfig, SimulationSizing,
};
pub use cosmology::{
    initialize_cosmology_params, CosmologyBackend, CosmologyError, CosmologyParams, FlatLambdaCdm,
    RefinementSettings,
};
pub use distribution::{
    encode_constant, encode_normal, encode_uniform, normalize_param, DistributionError,
    DistributionRecord,
};
pub use image::{downsample, generate_grids, normalize_to_unit_std, ImageError};
pub use param_tree::{EncodedTree, ParamTree, SampledTree, TreeError, TreeLeaf};
pub use rng_key::{KeyStream, RngKey};
pub use sampler::{draw_sample, extract_multiple_models, select_model, ModelDraws, SamplerError};
pub use scene::{Batch, SceneAssembler, SceneError, SceneParameters};
pub use truth::{extract_truth_values, TruthError, TruthTarget, TruthTargets};
