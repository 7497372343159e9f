//! Run configuration loaded from JSON.
//!
//! One [`InputConfig`] describes everything a scene draw needs besides the
//! generator key and the cosmology tables: the declarative lensing
//! configuration, detector and PSF settings, population sizing, the model
//! catalogs and the truth targets. Loading always validates, so a config that
//! made it into memory can be drawn from without further checks.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cosmology::{
    initialize_cosmology_params, CosmologyBackend, CosmologyError, CosmologyParams,
    RefinementSettings,
};
use crate::distribution::DistributionError;
use crate::param_tree::{EncodedTree, TreeError};
use crate::rng_key::RngKey;
use crate::truth::{TruthError, TruthTargets};

/// Objects every lensing configuration must declare.
pub const REQUIRED_OBJECTS: [&str; 5] = [
    "lens_light_params",
    "los_params",
    "main_deflector_params",
    "source_params",
    "subhalo_params",
];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid distribution at '{path}': {source}")]
    Distribution {
        path: String,
        #[source]
        source: DistributionError,
    },
    #[error("lensing config: {0}")]
    Tree(#[from] TreeError),
    #[error(transparent)]
    Truth(#[from] TruthError),
    #[error("{name} {index} out of range for {n_models} models")]
    PrincipalIndex {
        name: &'static str,
        index: usize,
        n_models: usize,
    },
    #[error("model catalog '{0}' is empty")]
    EmptyCatalog(&'static str),
    #[error("invalid detector: {0}")]
    Detector(String),
    #[error("invalid psf: {0}")]
    Psf(String),
}

/// Detector geometry at output resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Output pixels along x
    pub n_x: usize,
    /// Output pixels along y
    pub n_y: usize,
    /// Output pixel width in arcseconds
    pub pixel_width: f64,
    /// Rendered sub-pixels per output pixel along each axis
    pub supersampling_factor: usize,
    /// Renderer-specific settings (exposure time, zero point, ...)
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_x == 0 || self.n_y == 0 {
            return Err(ConfigError::Detector(format!(
                "image shape must be non-empty, got {}x{}",
                self.n_y, self.n_x
            )));
        }
        if self.supersampling_factor == 0 {
            return Err(ConfigError::Detector(
                "supersampling factor must be at least 1".to_string(),
            ));
        }
        if !(self.pixel_width.is_finite() && self.pixel_width > 0.0) {
            return Err(ConfigError::Detector(format!(
                "pixel width must be positive, got {}",
                self.pixel_width
            )));
        }
        Ok(())
    }

    /// Shape of the supersampled image, `(rows, cols)`.
    pub fn supersampled_shape(&self) -> (usize, usize) {
        (
            self.n_y * self.supersampling_factor,
            self.n_x * self.supersampling_factor,
        )
    }
}

/// Point spread function, defined on the supersampled grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum PsfConfig {
    /// Gaussian with full width at half maximum in arcseconds
    Gaussian { fwhm: f64 },
    /// Pixelated kernel, row-major
    Pixel { kernel: Vec<Vec<f64>> },
}

impl PsfConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            PsfConfig::Gaussian { fwhm } => {
                if !(fwhm.is_finite() && *fwhm > 0.0) {
                    return Err(ConfigError::Psf(format!(
                        "gaussian fwhm must be positive, got {fwhm}"
                    )));
                }
            }
            PsfConfig::Pixel { kernel } => {
                let width = kernel.first().map(|row| row.len()).unwrap_or(0);
                if width == 0 {
                    return Err(ConfigError::Psf("pixel kernel is empty".to_string()));
                }
                if kernel.iter().any(|row| row.len() != width) {
                    return Err(ConfigError::Psf(
                        "pixel kernel rows differ in length".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Sizes of the padded halo lists handed to the population collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationSizing {
    pub num_z_bins: usize,
    pub los_pad_length: usize,
    pub subhalos_pad_length: usize,
    pub sampling_pad_length: usize,
}

/// Candidate model names for the multi-model objects.
///
/// Only the lengths matter for sampling; the names are passed through to the
/// renderer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCatalog {
    pub all_main_deflector_models: Vec<String>,
    pub all_source_models: Vec<String>,
}

impl ModelCatalog {
    pub fn num_main_deflector_models(&self) -> usize {
        self.all_main_deflector_models.len()
    }

    pub fn num_source_models(&self) -> usize {
        self.all_source_models.len()
    }
}

/// Complete description of a training-data run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputConfig {
    pub lensing_config: EncodedTree,
    pub cosmology_params: EncodedTree,
    pub kwargs_detector: DetectorConfig,
    pub kwargs_psf: PsfConfig,
    pub kwargs_simulation: SimulationSizing,
    pub all_models: ModelCatalog,
    pub principal_md_index: usize,
    pub principal_source_index: usize,
    pub truth_parameters: TruthTargets,
    #[serde(default)]
    pub refinement: RefinementSettings,
}

fn validate_records(tree: &EncodedTree, prefix: &str) -> Result<(), ConfigError> {
    for (path, record) in tree.leaves() {
        record
            .validate()
            .map_err(|source| ConfigError::Distribution {
                path: format!("{prefix}.{path}"),
                source,
            })?;
    }
    Ok(())
}

impl InputConfig {
    /// Parse and validate a JSON config.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: InputConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!("Loading input config from {}", path.display());
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Write the config as pretty-printed JSON.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Check everything a scene draw relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_records(&self.lensing_config, "lensing_config")?;
        validate_records(&self.cosmology_params, "cosmology_params")?;

        for object in REQUIRED_OBJECTS {
            self.lensing_config.object(object)?;
        }

        let n_md = self.all_models.num_main_deflector_models();
        let n_source = self.all_models.num_source_models();
        if n_md == 0 {
            return Err(ConfigError::EmptyCatalog("all_main_deflector_models"));
        }
        if n_source == 0 {
            return Err(ConfigError::EmptyCatalog("all_source_models"));
        }
        if self.principal_md_index >= n_md {
            return Err(ConfigError::PrincipalIndex {
                name: "principal_md_index",
                index: self.principal_md_index,
                n_models: n_md,
            });
        }
        if self.principal_source_index >= n_source {
            return Err(ConfigError::PrincipalIndex {
                name: "principal_source_index",
                index: self.principal_source_index,
                n_models: n_source,
            });
        }

        self.kwargs_detector.validate()?;
        self.kwargs_psf.validate()?;
        self.truth_parameters.resolve(&self.lensing_config)?;
        Ok(())
    }

    /// Draw this run's cosmology with its own refinement settings.
    pub fn initialize_cosmology<B>(
        &self,
        key: RngKey,
        backend: &B,
    ) -> Result<CosmologyParams, CosmologyError>
    where
        B: CosmologyBackend + ?Sized,
    {
        initialize_cosmology_params(
            &self.lensing_config,
            &self.cosmology_params,
            key,
            backend,
            &self.refinement,
        )
    }
}
