//! Interfaces to the physics collaborators of a scene draw.
//!
//! Rendering and halo population are owned by other components. A scene draw
//! only needs them to be deterministic functions of their inputs and the key
//! they are handed, and safe to call from several threads at once.
//!
//! [`mock`] provides simple deterministic implementations for tests and for
//! exercising the pipeline without a lensing renderer.

pub mod mock;

use std::error::Error;

use ndarray::Array2;

use crate::config::{DetectorConfig, ModelCatalog, PsfConfig};
use crate::cosmology::CosmologyParams;
use crate::param_tree::{ParamTree, SampledTree};
use crate::rng_key::RngKey;
use crate::sampler::ModelDraws;

/// Boxed failure reported by a collaborator.
pub type CollaboratorError = Box<dyn Error + Send + Sync>;

/// Padded list of halos; every parameter leaf holds one value per halo.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HaloPopulation {
    pub redshifts: Vec<f64>,
    pub parameters: ParamTree<Vec<f64>>,
}

impl HaloPopulation {
    pub fn len(&self) -> usize {
        self.redshifts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.redshifts.is_empty()
    }
}

/// Everything the renderer sees for one scene.
///
/// Deflector, source and lens-light draws carry all candidate models so the
/// renderer can blend profiles; the populations were placed around the
/// principal models.
#[derive(Debug, Clone, Copy)]
pub struct RenderRequest<'a> {
    pub grid_x: &'a Array2<f64>,
    pub grid_y: &'a Array2<f64>,
    pub main_deflectors: &'a ModelDraws,
    pub sources: &'a ModelDraws,
    pub lens_light: &'a ModelDraws,
    pub los_before: &'a HaloPopulation,
    pub los_after: &'a HaloPopulation,
    pub subhalos: &'a HaloPopulation,
    pub z_source: f64,
    pub psf: &'a PsfConfig,
    pub detector: &'a DetectorConfig,
    pub cosmology: &'a CosmologyParams,
    pub models: &'a ModelCatalog,
}

/// Produces a supersampled image on the request's grids.
pub trait ImageRenderer: Send + Sync {
    fn render(&self, request: &RenderRequest<'_>) -> Result<Array2<f64>, CollaboratorError>;
}

/// Places line-of-sight halos in front of and behind the main deflector.
pub trait LineOfSightPopulator: Send + Sync {
    /// Returns the `(before, after)` populations relative to the deflector
    /// redshift, each padded to `pad_length`.
    #[allow(clippy::too_many_arguments)]
    fn populate_line_of_sight(
        &self,
        main_deflector: &SampledTree,
        source: &SampledTree,
        los_globals: &SampledTree,
        cosmology: &CosmologyParams,
        key: RngKey,
        num_z_bins: usize,
        pad_length: usize,
    ) -> Result<(HaloPopulation, HaloPopulation), CollaboratorError>;
}

/// Places subhalos of the main deflector.
pub trait SubhaloPopulator: Send + Sync {
    /// Returns a population padded to `pad_length`, selected from
    /// `sampling_pad_length` candidates.
    #[allow(clippy::too_many_arguments)]
    fn populate_subhalos(
        &self,
        main_deflector: &SampledTree,
        source: &SampledTree,
        subhalo_globals: &SampledTree,
        cosmology: &CosmologyParams,
        key: RngKey,
        pad_length: usize,
        sampling_pad_length: usize,
    ) -> Result<HaloPopulation, CollaboratorError>;
}

/// The three collaborators of a scene draw, borrowed together.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub renderer: &'a dyn ImageRenderer,
    pub line_of_sight: &'a dyn LineOfSightPopulator,
    pub subhalos: &'a dyn SubhaloPopulator,
}
