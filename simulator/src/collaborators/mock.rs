//! Deterministic stand-ins for the physics collaborators.
//!
//! None of these model lensing. They produce images and halo lists with the
//! right shapes, depend only on their inputs and key, and read the same
//! parameter names a real implementation would (`z_lens`, `z_source`,
//! `theta_e`, `m_min`, `m_max`, `center_x`, ...).

use ndarray::Array2;
use rand::Rng;

use super::{
    CollaboratorError, HaloPopulation, ImageRenderer, LineOfSightPopulator, RenderRequest,
    SubhaloPopulator,
};
use crate::config::PsfConfig;
use crate::cosmology::CosmologyParams;
use crate::param_tree::{ParamTree, SampledTree};
use crate::rng_key::RngKey;
use crate::sampler::{num_models, ModelDraws};

/// FWHM of a Gaussian in units of its standard deviation, 2·sqrt(2·ln 2)
const FWHM_PER_SIGMA: f64 = 2.354_820_045_030_949;

/// Half-width of the square halos are scattered over, arcseconds
const LOS_FIELD_HALF_WIDTH: f64 = 2.0;

/// Peak brightness of a 1e9 solar-mass halo blob
const HALO_BRIGHTNESS_PER_1E9: f64 = 1e-3;

fn model_field(draws: &ModelDraws, name: &str, model: usize, default: f64) -> f64 {
    draws
        .get(&[name])
        .ok()
        .and_then(|values| values.get(model))
        .copied()
        .unwrap_or(default)
}

fn add_blob(
    image: &mut Array2<f64>,
    request: &RenderRequest<'_>,
    center: (f64, f64),
    variance: f64,
    amplitude: f64,
) {
    for ((value, x), y) in image
        .iter_mut()
        .zip(request.grid_x.iter())
        .zip(request.grid_y.iter())
    {
        let r2 = (x - center.0).powi(2) + (y - center.1).powi(2);
        *value += amplitude * (-r2 / (2.0 * variance)).exp();
    }
}

/// Sum of Gaussian blobs: one per lens-light model, one per source model and
/// a faint one per non-empty halo.
///
/// Widths are broadened by a Gaussian PSF; pixel PSFs are ignored.
#[derive(Debug, Clone, Default)]
pub struct GaussianBlobRenderer {
    pub background: f64,
}

impl GaussianBlobRenderer {
    pub fn new(background: f64) -> Self {
        Self { background }
    }

    fn psf_variance(psf: &PsfConfig) -> f64 {
        match psf {
            PsfConfig::Gaussian { fwhm } => (fwhm / FWHM_PER_SIGMA).powi(2),
            PsfConfig::Pixel { .. } => 0.0,
        }
    }

    fn add_models(
        image: &mut Array2<f64>,
        request: &RenderRequest<'_>,
        draws: &ModelDraws,
        default_width: f64,
    ) {
        let psf_variance = Self::psf_variance(request.psf);
        for model in 0..num_models(draws) {
            let center = (
                model_field(draws, "center_x", model, 0.0),
                model_field(draws, "center_y", model, 0.0),
            );
            let width = model_field(draws, "r_sersic", model, default_width);
            let amplitude = model_field(draws, "amp", model, 1.0);
            add_blob(image, request, center, width * width + psf_variance, amplitude);
        }
    }

    fn add_halos(image: &mut Array2<f64>, request: &RenderRequest<'_>, halos: &HaloPopulation) {
        let column = |name: &str| halos.parameters.get(&[name]).ok();
        let (Some(xs), Some(ys), Some(masses)) =
            (column("center_x"), column("center_y"), column("mass"))
        else {
            return;
        };

        let psf_variance = Self::psf_variance(request.psf);
        for ((x, y), mass) in xs.iter().zip(ys).zip(masses) {
            if *mass > 0.0 {
                let amplitude = HALO_BRIGHTNESS_PER_1E9 * mass / 1e9;
                add_blob(image, request, (*x, *y), 0.01 + psf_variance, amplitude);
            }
        }
    }
}

impl ImageRenderer for GaussianBlobRenderer {
    fn render(&self, request: &RenderRequest<'_>) -> Result<Array2<f64>, CollaboratorError> {
        if request.grid_x.dim() != request.grid_y.dim() {
            return Err(format!(
                "grid shapes differ: {:?} vs {:?}",
                request.grid_x.dim(),
                request.grid_y.dim()
            )
            .into());
        }

        let mut image = Array2::from_elem(request.grid_x.dim(), self.background);
        Self::add_models(&mut image, request, request.lens_light, 0.5);
        Self::add_models(&mut image, request, request.sources, 0.2);
        for halos in [request.los_before, request.los_after, request.subhalos] {
            Self::add_halos(&mut image, request, halos);
        }
        Ok(image)
    }
}

/// Fills the grid with one value.
#[derive(Debug, Clone)]
pub struct ConstantRenderer {
    pub value: f64,
}

impl ImageRenderer for ConstantRenderer {
    fn render(&self, request: &RenderRequest<'_>) -> Result<Array2<f64>, CollaboratorError> {
        Ok(Array2::from_elem(request.grid_x.dim(), self.value))
    }
}

/// Always fails with the given message.
#[derive(Debug, Clone)]
pub struct FailingRenderer {
    pub message: String,
}

impl ImageRenderer for FailingRenderer {
    fn render(&self, _request: &RenderRequest<'_>) -> Result<Array2<f64>, CollaboratorError> {
        Err(self.message.clone().into())
    }
}

#[derive(Default)]
struct HaloColumns {
    redshifts: Vec<f64>,
    center_x: Vec<f64>,
    center_y: Vec<f64>,
    mass: Vec<f64>,
}

impl HaloColumns {
    fn push(&mut self, z: f64, center: (f64, f64), mass: f64) {
        self.redshifts.push(z);
        self.center_x.push(center.0);
        self.center_y.push(center.1);
        self.mass.push(mass);
    }

    /// Fill with massless halos at `z` until `len` entries exist.
    fn pad_to(&mut self, len: usize, z: f64) {
        while self.redshifts.len() < len {
            self.push(z, (0.0, 0.0), 0.0);
        }
    }

    fn into_population(self) -> HaloPopulation {
        HaloPopulation {
            redshifts: self.redshifts,
            parameters: ParamTree::new()
                .leaf("center_x", self.center_x)
                .leaf("center_y", self.center_y)
                .leaf("mass", self.mass),
        }
    }
}

fn log_uniform<R: Rng>(rng: &mut R, min: f64, max: f64) -> f64 {
    let u: f64 = rng.gen();
    (min.ln() + u * (max.ln() - min.ln())).exp()
}

fn symmetric<R: Rng>(rng: &mut R, half_width: f64) -> f64 {
    let u: f64 = rng.gen();
    (2.0 * u - 1.0) * half_width
}

/// Scatters `pad_length` halos uniformly over redshift bins on each side of
/// the deflector, log-uniform in mass between the `m_min` and `m_max`
/// globals.
#[derive(Debug, Clone, Default)]
pub struct KeyDrivenLosPopulator;

impl KeyDrivenLosPopulator {
    fn draw_slab(
        key: RngKey,
        z_range: (f64, f64),
        num_z_bins: usize,
        pad_length: usize,
        mass_range: (f64, f64),
    ) -> HaloPopulation {
        let mut rng = key.rng();
        let n_bins = num_z_bins.max(1);
        let bin_width = (z_range.1 - z_range.0) / n_bins as f64;

        let mut halos = HaloColumns::default();
        for _ in 0..pad_length {
            let bin = rng.gen_range(0..n_bins);
            let z = z_range.0 + (bin as f64 + 0.5) * bin_width;
            let center = (
                symmetric(&mut rng, LOS_FIELD_HALF_WIDTH),
                symmetric(&mut rng, LOS_FIELD_HALF_WIDTH),
            );
            halos.push(z, center, log_uniform(&mut rng, mass_range.0, mass_range.1));
        }
        halos.into_population()
    }
}

impl LineOfSightPopulator for KeyDrivenLosPopulator {
    fn populate_line_of_sight(
        &self,
        main_deflector: &SampledTree,
        source: &SampledTree,
        los_globals: &SampledTree,
        cosmology: &CosmologyParams,
        key: RngKey,
        num_z_bins: usize,
        pad_length: usize,
    ) -> Result<(HaloPopulation, HaloPopulation), CollaboratorError> {
        let z_lens = *main_deflector.get(&["z_lens"])?;
        let z_source = *source.get(&["z_source"])?;
        let z_far = cosmology
            .los
            .as_ref()
            .map_or(z_source, |los| z_source.min(los.max_source_z));
        if !(0.0 < z_lens && z_lens < z_far) {
            return Err(format!("lens redshift {z_lens} must lie in (0, {z_far})").into());
        }

        let mass_range = (*los_globals.get(&["m_min"])?, *los_globals.get(&["m_max"])?);
        let [before_key, after_key] = key.split_array::<2>();
        Ok((
            Self::draw_slab(before_key, (0.0, z_lens), num_z_bins, pad_length, mass_range),
            Self::draw_slab(after_key, (z_lens, z_far), num_z_bins, pad_length, mass_range),
        ))
    }
}

/// Draws `sampling_pad_length` candidate subhalos in a square around the
/// deflector, keeps those within two Einstein radii, and pads the kept list
/// to `pad_length` with massless entries.
#[derive(Debug, Clone, Default)]
pub struct KeyDrivenSubhaloPopulator;

impl SubhaloPopulator for KeyDrivenSubhaloPopulator {
    fn populate_subhalos(
        &self,
        main_deflector: &SampledTree,
        _source: &SampledTree,
        subhalo_globals: &SampledTree,
        _cosmology: &CosmologyParams,
        key: RngKey,
        pad_length: usize,
        sampling_pad_length: usize,
    ) -> Result<HaloPopulation, CollaboratorError> {
        let z_lens = *main_deflector.get(&["z_lens"])?;
        let theta_e = *main_deflector.get(&["theta_e"])?;
        let center_x = main_deflector.get(&["center_x"]).copied().unwrap_or(0.0);
        let center_y = main_deflector.get(&["center_y"]).copied().unwrap_or(0.0);
        let m_min = *subhalo_globals.get(&["m_min"])?;
        let m_max = *subhalo_globals.get(&["m_max"])?;

        let radius = 2.0 * theta_e;
        let mut rng = key.rng();
        let mut halos = HaloColumns::default();
        for _ in 0..sampling_pad_length {
            let dx = symmetric(&mut rng, radius);
            let dy = symmetric(&mut rng, radius);
            let mass = log_uniform(&mut rng, m_min, m_max);
            if halos.redshifts.len() < pad_length && dx * dx + dy * dy <= radius * radius {
                halos.push(z_lens, (center_x + dx, center_y + dy), mass);
            }
        }
        halos.pad_to(pad_length, z_lens);
        Ok(halos.into_population())
    }
}

/// Line-of-sight populator that always fails with the given message.
#[derive(Debug, Clone)]
pub struct FailingLosPopulator {
    pub message: String,
}

impl LineOfSightPopulator for FailingLosPopulator {
    fn populate_line_of_sight(
        &self,
        _main_deflector: &SampledTree,
        _source: &SampledTree,
        _los_globals: &SampledTree,
        _cosmology: &CosmologyParams,
        _key: RngKey,
        _num_z_bins: usize,
        _pad_length: usize,
    ) -> Result<(HaloPopulation, HaloPopulation), CollaboratorError> {
        Err(self.message.clone().into())
    }
}

/// Subhalo populator that always fails with the given message.
#[derive(Debug, Clone)]
pub struct FailingSubhaloPopulator {
    pub message: String,
}

impl SubhaloPopulator for FailingSubhaloPopulator {
    fn populate_subhalos(
        &self,
        _main_deflector: &SampledTree,
        _source: &SampledTree,
        _subhalo_globals: &SampledTree,
        _cosmology: &CosmologyParams,
        _key: RngKey,
        _pad_length: usize,
        _sampling_pad_length: usize,
    ) -> Result<HaloPopulation, CollaboratorError> {
        Err(self.message.clone().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cosmology::{
        initialize_cosmology_params, FlatLambdaCdm, RefinementSettings,
    };
    use crate::distribution::encode_constant;
    use crate::param_tree::EncodedTree;

    fn cosmology() -> CosmologyParams {
        let constant = |v| encode_constant(v).unwrap();
        let lensing: EncodedTree = ParamTree::new()
            .branch("source_params", ParamTree::new().leaf("z_source", constant(1.5)))
            .branch(
                "los_params",
                ParamTree::new()
                    .leaf("dz", constant(0.05))
                    .leaf("m_min", constant(1e7))
                    .leaf("m_max", constant(1e10)),
            )
            .branch(
                "subhalo_params",
                ParamTree::new()
                    .leaf("m_min", constant(1e7))
                    .leaf("m_max", constant(1e10)),
            );
        let params: EncodedTree = ParamTree::new()
            .leaf("omega_m_zero", constant(0.3))
            .leaf("hubble_constant", constant(70.0))
            .leaf("sigma_eight", constant(0.8));
        let settings = RefinementSettings {
            refined_points: 32,
            ..RefinementSettings::default()
        };
        initialize_cosmology_params(
            &lensing,
            &params,
            RngKey::new(0),
            &FlatLambdaCdm::default(),
            &settings,
        )
        .unwrap()
    }

    fn deflector() -> SampledTree {
        ParamTree::new().leaf("z_lens", 0.5).leaf("theta_e", 1.0)
    }

    fn globals() -> SampledTree {
        ParamTree::new().leaf("m_min", 1e7).leaf("m_max", 1e10)
    }

    #[test]
    fn test_los_populations_are_padded_and_ordered() {
        let source = ParamTree::new().leaf("z_source", 1.5);
        let (before, after) = KeyDrivenLosPopulator
            .populate_line_of_sight(
                &deflector(),
                &source,
                &globals(),
                &cosmology(),
                RngKey::new(1),
                10,
                6,
            )
            .unwrap();

        assert_eq!(before.len(), 6);
        assert_eq!(after.len(), 6);
        assert!(before.redshifts.iter().all(|z| *z > 0.0 && *z < 0.5));
        assert!(after.redshifts.iter().all(|z| *z > 0.5 && *z < 1.5));
        let masses = before.parameters.get(&["mass"]).unwrap();
        assert!(masses.iter().all(|m| (1e7..=1e10).contains(m)));
    }

    #[test]
    fn test_los_requires_lens_in_front_of_source() {
        let source = ParamTree::new().leaf("z_source", 0.4);
        assert!(KeyDrivenLosPopulator
            .populate_line_of_sight(
                &deflector(),
                &source,
                &globals(),
                &cosmology(),
                RngKey::new(1),
                10,
                6,
            )
            .is_err());
    }

    #[test]
    fn test_subhalos_are_key_driven() {
        let source = ParamTree::new().leaf("z_source", 1.5);
        let cosmology = cosmology();
        let draw = |key| {
            KeyDrivenSubhaloPopulator
                .populate_subhalos(&deflector(), &source, &globals(), &cosmology, key, 8, 32)
                .unwrap()
        };

        let a = draw(RngKey::new(3));
        assert_eq!(a, draw(RngKey::new(3)));
        assert_ne!(a, draw(RngKey::new(4)));
        assert_eq!(a.len(), 8);
        assert!(a.redshifts.iter().all(|z| *z == 0.5));
    }

    #[test]
    fn test_subhalos_missing_field_is_error() {
        let source = ParamTree::new().leaf("z_source", 1.5);
        let deflector = ParamTree::new().leaf("z_lens", 0.5);
        assert!(KeyDrivenSubhaloPopulator
            .populate_subhalos(&deflector, &source, &globals(), &cosmology(), RngKey::new(3), 8, 32)
            .is_err());
    }
}
