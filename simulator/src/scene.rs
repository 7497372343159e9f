//! Scene assembly: one training example per generator key.
//!
//! A scene is a complete lensing system drawn from the declarative
//! configuration, rendered, and reduced to a normalized image plus a vector
//! of normalized truth labels.
//!
//! # Draw Sequence
//!
//! 1. **Key split**: the scene key is split into six streams for the main
//!    deflector, source, lens light, line-of-sight globals, subhalo globals
//!    and a reserve stream.
//! 2. **Parameter draws**: deflector, source and lens-light objects are drawn
//!    once per candidate model; line-of-sight and subhalo globals are drawn
//!    once.
//! 3. **Principal selection**: the principal deflector and source models
//!    anchor the redshifts and coordinates of the halo populations. The
//!    other candidate models only feed the renderer.
//! 4. **Populations**: the reserve key is split again into line-of-sight and
//!    subhalo keys for the population collaborators.
//! 5. **Rendering**: the renderer produces a supersampled image.
//! 6. **Reduction**: the image is box-averaged to detector resolution and
//!    divided by its own standard deviation.
//! 7. **Labels**: truth targets are read from the principal parameter sets
//!    and the global draws, then normalized.
//!
//! # Reproducibility
//!
//! Every step is a pure function of the scene key and the borrowed inputs,
//! so the same key always gives the same scene (up to the renderer's own
//! determinism). Batches split their key into one key per scene and draw
//! scenes in parallel; the result is identical to drawing the same keys one
//! after another.

use log::debug;
use ndarray::{stack, Array1, Array2, Array3, Axis};
use shared::algo::try_par_map_ordered;
use thiserror::Error;

use crate::collaborators::{CollaboratorError, Collaborators, HaloPopulation, RenderRequest};
use crate::config::{DetectorConfig, InputConfig, ModelCatalog, PsfConfig, SimulationSizing};
use crate::cosmology::CosmologyParams;
use crate::image::{downsample, normalize_to_unit_std, ImageError};
use crate::param_tree::{EncodedTree, ParamTree, SampledTree, TreeError};
use crate::rng_key::RngKey;
use crate::sampler::{draw_sample, extract_multiple_models, select_model, ModelDraws, SamplerError};
use crate::truth::{extract_truth_values, TruthError, TruthTargets};

pub const MAIN_DEFLECTOR_PARAMS: &str = "main_deflector_params";
pub const SOURCE_PARAMS: &str = "source_params";
pub const LENS_LIGHT_PARAMS: &str = "lens_light_params";
pub const LOS_PARAMS: &str = "los_params";
pub const SUBHALO_PARAMS: &str = "subhalo_params";

#[derive(Error, Debug)]
pub enum SceneError {
    #[error("lensing config: {0}")]
    Tree(#[from] TreeError),
    #[error(transparent)]
    Sampler(#[from] SamplerError),
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error(transparent)]
    Truth(#[from] TruthError),
    #[error("line-of-sight population failed: {0}")]
    LineOfSight(#[source] CollaboratorError),
    #[error("subhalo population failed: {0}")]
    Subhalos(#[source] CollaboratorError),
    #[error("rendering failed: {0}")]
    Render(#[source] CollaboratorError),
    #[error("rendered image has shape {actual:?}, expected {expected:?}")]
    RenderShape {
        actual: (usize, usize),
        expected: (usize, usize),
    },
    #[error("batch size must be at least 1")]
    EmptyBatch,
    #[error("failed to stack batch: {0}")]
    Stack(#[from] ndarray::ShapeError),
}

/// Parameter draws of one scene, before any collaborator runs.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneParameters {
    /// All candidate main-deflector models
    pub main_deflectors: ModelDraws,
    /// All candidate source models
    pub sources: ModelDraws,
    /// Lens light, one draw per source model
    pub lens_light: ModelDraws,
    pub los_globals: SampledTree,
    pub subhalo_globals: SampledTree,
    pub principal_main_deflector: SampledTree,
    pub principal_source: SampledTree,
    pub principal_lens_light: SampledTree,
    /// Key left over for the population draws
    pub reserve: RngKey,
}

impl SceneParameters {
    /// Principal and global draws grouped by object, the form truth labels
    /// are extracted from.
    pub fn principal_params(&self) -> SampledTree {
        ParamTree::new()
            .branch(MAIN_DEFLECTOR_PARAMS, self.principal_main_deflector.clone())
            .branch(SOURCE_PARAMS, self.principal_source.clone())
            .branch(LENS_LIGHT_PARAMS, self.principal_lens_light.clone())
            .branch(LOS_PARAMS, self.los_globals.clone())
            .branch(SUBHALO_PARAMS, self.subhalo_globals.clone())
    }
}

/// Images and labels of several scenes stacked along a leading axis.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// `(batch, n_y, n_x)`
    pub images: Array3<f64>,
    /// `(batch, n_targets)`
    pub truths: Array2<f64>,
}

/// Draws scenes from a fixed configuration and cosmology.
///
/// Holds only shared references, so one assembler can be used from many
/// threads at once.
#[derive(Clone, Copy)]
pub struct SceneAssembler<'a> {
    pub lensing_config: &'a EncodedTree,
    pub cosmology: &'a CosmologyParams,
    pub grid_x: &'a Array2<f64>,
    pub grid_y: &'a Array2<f64>,
    pub models: &'a ModelCatalog,
    pub principal_md_index: usize,
    pub principal_source_index: usize,
    pub sizing: &'a SimulationSizing,
    pub detector: &'a DetectorConfig,
    pub psf: &'a PsfConfig,
    pub truth_targets: &'a TruthTargets,
    pub collaborators: Collaborators<'a>,
}

impl<'a> SceneAssembler<'a> {
    /// Assembler over a validated run configuration.
    ///
    /// `grid_x` and `grid_y` are usually the output of
    /// [`generate_grids`](crate::image::generate_grids) for
    /// `config.kwargs_detector`.
    pub fn new(
        config: &'a InputConfig,
        cosmology: &'a CosmologyParams,
        grid_x: &'a Array2<f64>,
        grid_y: &'a Array2<f64>,
        collaborators: Collaborators<'a>,
    ) -> Self {
        Self {
            lensing_config: &config.lensing_config,
            cosmology,
            grid_x,
            grid_y,
            models: &config.all_models,
            principal_md_index: config.principal_md_index,
            principal_source_index: config.principal_source_index,
            sizing: &config.kwargs_simulation,
            detector: &config.kwargs_detector,
            psf: &config.kwargs_psf,
            truth_targets: &config.truth_parameters,
            collaborators,
        }
    }

    /// Draw every object's parameters for the scene keyed by `key`.
    pub fn draw_scene_parameters(&self, key: RngKey) -> Result<SceneParameters, SceneError> {
        let [md_key, source_key, lens_light_key, los_key, subhalo_key, reserve] =
            key.split_array::<6>();
        let n_md = self.models.num_main_deflector_models();
        let n_source = self.models.num_source_models();

        let main_deflectors = extract_multiple_models(
            self.lensing_config.object(MAIN_DEFLECTOR_PARAMS)?,
            md_key,
            n_md,
        )?;
        let sources = extract_multiple_models(
            self.lensing_config.object(SOURCE_PARAMS)?,
            source_key,
            n_source,
        )?;
        let lens_light = extract_multiple_models(
            self.lensing_config.object(LENS_LIGHT_PARAMS)?,
            lens_light_key,
            n_source,
        )?;
        let los_globals = draw_sample(self.lensing_config.object(LOS_PARAMS)?, los_key);
        let subhalo_globals = draw_sample(self.lensing_config.object(SUBHALO_PARAMS)?, subhalo_key);

        let principal_main_deflector = select_model(&main_deflectors, self.principal_md_index)?;
        let principal_source = select_model(&sources, self.principal_source_index)?;
        let principal_lens_light = select_model(&lens_light, self.principal_source_index)?;

        Ok(SceneParameters {
            main_deflectors,
            sources,
            lens_light,
            los_globals,
            subhalo_globals,
            principal_main_deflector,
            principal_source,
            principal_lens_light,
            reserve,
        })
    }

    fn populate(
        &self,
        params: &SceneParameters,
    ) -> Result<(HaloPopulation, HaloPopulation, HaloPopulation), SceneError> {
        let [los_key, subhalo_key] = params.reserve.split_array::<2>();

        let (los_before, los_after) = self
            .collaborators
            .line_of_sight
            .populate_line_of_sight(
                &params.principal_main_deflector,
                &params.principal_source,
                &params.los_globals,
                self.cosmology,
                los_key,
                self.sizing.num_z_bins,
                self.sizing.los_pad_length,
            )
            .map_err(SceneError::LineOfSight)?;

        let subhalos = self
            .collaborators
            .subhalos
            .populate_subhalos(
                &params.principal_main_deflector,
                &params.principal_source,
                &params.subhalo_globals,
                self.cosmology,
                subhalo_key,
                self.sizing.subhalos_pad_length,
                self.sizing.sampling_pad_length,
            )
            .map_err(SceneError::Subhalos)?;

        Ok((los_before, los_after, subhalos))
    }

    /// Draw one normalized image and its truth labels.
    pub fn draw_image_and_truth(
        &self,
        key: RngKey,
    ) -> Result<(Array2<f64>, Array1<f64>), SceneError> {
        let params = self.draw_scene_parameters(key)?;
        let (los_before, los_after, subhalos) = self.populate(&params)?;
        let z_source = *params.principal_source.get(&["z_source"])?;

        let request = RenderRequest {
            grid_x: self.grid_x,
            grid_y: self.grid_y,
            main_deflectors: &params.main_deflectors,
            sources: &params.sources,
            lens_light: &params.lens_light,
            los_before: &los_before,
            los_after: &los_after,
            subhalos: &subhalos,
            z_source,
            psf: self.psf,
            detector: self.detector,
            cosmology: self.cosmology,
            models: self.models,
        };
        let supersampled = self
            .collaborators
            .renderer
            .render(&request)
            .map_err(SceneError::Render)?;
        if supersampled.dim() != self.grid_x.dim() {
            return Err(SceneError::RenderShape {
                actual: supersampled.dim(),
                expected: self.grid_x.dim(),
            });
        }

        let image = downsample(&supersampled, self.detector.supersampling_factor)?;
        let image = normalize_to_unit_std(image)?;

        let truth = extract_truth_values(
            &params.principal_params(),
            self.lensing_config,
            self.truth_targets,
        )?;
        Ok((image, truth))
    }

    /// Draw `batch_size` scenes from keys split off `key`.
    ///
    /// Scene `i` is `draw_image_and_truth(key.split(batch_size)[i])`.
    pub fn draw_batch(&self, key: RngKey, batch_size: usize) -> Result<Batch, SceneError> {
        if batch_size == 0 {
            return Err(SceneError::EmptyBatch);
        }
        debug!("Drawing batch of {batch_size} scenes from key {:#018x}", key.raw());

        let keys = key.split(batch_size);
        let scenes =
            try_par_map_ordered(&keys, |_, scene_key| self.draw_image_and_truth(*scene_key))?;

        let images: Vec<_> = scenes.iter().map(|(image, _)| image.view()).collect();
        let truths: Vec<_> = scenes.iter().map(|(_, truth)| truth.view()).collect();
        Ok(Batch {
            images: stack(Axis(0), &images)?,
            truths: stack(Axis(0), &truths)?,
        })
    }
}
