//! Cosmology initialization and lookup tables.
//!
//! The halo mass-function table needs Lagrangian-radius bounds, and those
//! bounds depend on the cosmology being drawn. Initialization therefore runs
//! in two passes:
//!
//! 1. Draw the cosmological parameters once.
//! 2. Build a deliberately coarse table over placeholder radius bounds, just
//!    good enough to evaluate Lagrangian radii.
//! 3. Evaluate the radii of the lightest and heaviest declared halos, padded
//!    by a mass margin on each side.
//! 4. Rebuild the table at full resolution over those radii.
//! 5. Attach the line-of-sight lookup tables.
//!
//! Table construction and the radius estimator sit behind
//! [`CosmologyBackend`]; [`FlatLambdaCdm`] is the reference implementation.
//! The resulting [`CosmologyParams`] is immutable and shared by reference
//! across all scene draws of a run.

use std::f64::consts::PI;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use shared::algo::{LookupError, LookupTable};
use thiserror::Error;

use crate::param_tree::{EncodedTree, SampledTree, TreeError};
use crate::rng_key::RngKey;
use crate::sampler::draw_sample;

/// Speed of light in km/s
pub const SPEED_OF_LIGHT_KM_S: f64 = 299_792.458;

/// Critical density today divided by h^2, in solar masses per cubic Mpc
pub const RHO_CRIT_H2_MSUN_MPC3: f64 = 2.775e11;

#[derive(Error, Debug)]
pub enum CosmologyError {
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error("lookup table construction failed: {0}")]
    Lookup(#[from] LookupError),
    #[error("invalid {name}: {value}")]
    InvalidBound { name: &'static str, value: f64 },
    #[error("cosmology backend failed: {0}")]
    Backend(String),
}

/// Placeholder constants of the two-pass radius refinement.
///
/// The coarse bounds only need to bracket the radii of the declared halo
/// masses for the first-pass cosmology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinementSettings {
    /// Lower Lagrangian radius of the coarse table, Mpc
    pub coarse_r_min: f64,
    /// Upper Lagrangian radius of the coarse table, Mpc
    pub coarse_r_max: f64,
    /// Radius samples in the coarse table
    pub coarse_points: usize,
    /// Factor applied below the lightest and above the heaviest declared mass
    pub mass_margin: f64,
    /// Maximum redshift of the refined table
    pub refined_z_max: f64,
    /// Radius samples in the refined table
    pub refined_points: usize,
}

impl Default for RefinementSettings {
    fn default() -> Self {
        Self {
            coarse_r_min: 1e-4,
            coarse_r_max: 1e3,
            coarse_points: 2,
            mass_margin: 10.0,
            refined_z_max: 1.5,
            refined_points: 10_000,
        }
    }
}

/// Redshift and mass bounds implied by the declared distributions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CosmologyBounds {
    /// Upper bound of the source redshift distribution
    pub max_source_z: f64,
    /// Smallest declared line-of-sight redshift step
    pub dz: f64,
    /// Lightest halo mass of either the subhalo or line-of-sight populations
    pub m_min: f64,
    /// Heaviest halo mass of either population
    pub m_max: f64,
}

impl CosmologyBounds {
    /// Read the bounds from an encoded lensing configuration.
    pub fn from_config(lensing_config: &EncodedTree) -> Result<Self, CosmologyError> {
        let max_source_z = lensing_config
            .get(&["source_params", "z_source"])?
            .decode_maximum();
        let dz = lensing_config.get(&["los_params", "dz"])?.decode_minimum();
        let m_min = lensing_config
            .get(&["subhalo_params", "m_min"])?
            .decode_minimum()
            .min(lensing_config.get(&["los_params", "m_min"])?.decode_minimum());
        let m_max = lensing_config
            .get(&["subhalo_params", "m_max"])?
            .decode_maximum()
            .max(lensing_config.get(&["los_params", "m_max"])?.decode_maximum());

        let bounds = Self {
            max_source_z,
            dz,
            m_min,
            m_max,
        };
        bounds.validate()?;
        Ok(bounds)
    }

    fn validate(&self) -> Result<(), CosmologyError> {
        let positive = |name: &'static str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(CosmologyError::InvalidBound { name, value })
            }
        };
        positive("maximum source redshift", self.max_source_z)?;
        positive("line-of-sight redshift step", self.dz)?;
        positive("minimum halo mass", self.m_min)?;
        positive("maximum halo mass", self.m_max)?;
        if self.m_min > self.m_max {
            return Err(CosmologyError::InvalidBound {
                name: "halo mass range (m_min > m_max), m_min",
                value: self.m_min,
            });
        }
        Ok(())
    }

    pub fn los_bounds(&self) -> LosBounds {
        LosBounds {
            m_min: self.m_min,
            m_max: self.m_max,
            dz: self.dz,
        }
    }
}

/// Mass and redshift-step keys of the line-of-sight lookup tables.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LosBounds {
    pub m_min: f64,
    pub m_max: f64,
    pub dz: f64,
}

/// Redshift and Lagrangian-radius lookup tables.
#[derive(Debug, Clone, PartialEq)]
pub struct MassFunctionTable {
    /// Comoving distance in Mpc over redshift
    pub comoving_distance: LookupTable,
    /// RMS mass variance over ln(Lagrangian radius / Mpc)
    pub mass_variance: LookupTable,
    /// Lagrangian radius bounds of `mass_variance`, Mpc
    pub radius_bounds: (f64, f64),
}

/// Tables used by line-of-sight population draws.
#[derive(Debug, Clone, PartialEq)]
pub struct LosLookup {
    pub bounds: LosBounds,
    pub max_source_z: f64,
    /// Differential comoving volume dV / dz / dΩ in Mpc^3 over redshift
    pub comoving_volume: LookupTable,
}

/// Drawn cosmology plus the lookup tables built for it.
#[derive(Debug, Clone, PartialEq)]
pub struct CosmologyParams {
    pub parameters: SampledTree,
    pub mass_function: MassFunctionTable,
    pub los: Option<LosLookup>,
}

impl CosmologyParams {
    /// Drawn cosmological parameter `name`.
    pub fn parameter(&self, name: &str) -> Result<f64, TreeError> {
        self.parameters.get(&[name]).copied()
    }
}

/// Construction of cosmological lookup tables.
pub trait CosmologyBackend: Send + Sync {
    /// Tables over `z ∈ [0, z_max]` with step `dz` and `n_r` Lagrangian radii
    /// spanning `[r_min, r_max]`.
    fn build_mass_function_table(
        &self,
        parameters: &SampledTree,
        z_max: f64,
        dz: f64,
        r_min: f64,
        r_max: f64,
        n_r: usize,
    ) -> Result<MassFunctionTable, CosmologyError>;

    /// Comoving radius of a sphere enclosing `mass` (solar masses) at the mean
    /// matter density, in Mpc.
    fn lagrangian_radius(&self, cosmology: &CosmologyParams, mass: f64)
        -> Result<f64, CosmologyError>;

    /// Line-of-sight tables keyed by the declared mass range and redshift step.
    fn build_los_lookup(
        &self,
        bounds: &LosBounds,
        cosmology: &CosmologyParams,
        max_source_z: f64,
    ) -> Result<LosLookup, CosmologyError>;
}

/// Draw the cosmology of a run and build its lookup tables.
pub fn initialize_cosmology_params<B>(
    lensing_config: &EncodedTree,
    cosmology_config: &EncodedTree,
    key: RngKey,
    backend: &B,
    settings: &RefinementSettings,
) -> Result<CosmologyParams, CosmologyError>
where
    B: CosmologyBackend + ?Sized,
{
    let bounds = CosmologyBounds::from_config(lensing_config)?;
    let parameters = draw_sample(cosmology_config, key);
    debug!("Drawn cosmology: {:?}", parameters.leaves());

    let coarse = CosmologyParams {
        mass_function: backend.build_mass_function_table(
            &parameters,
            bounds.max_source_z,
            bounds.dz / 2.0,
            settings.coarse_r_min,
            settings.coarse_r_max,
            settings.coarse_points,
        )?,
        parameters,
        los: None,
    };

    let r_min = backend.lagrangian_radius(&coarse, bounds.m_min / settings.mass_margin)?;
    let r_max = backend.lagrangian_radius(&coarse, bounds.m_max * settings.mass_margin)?;
    debug!(
        "Refined Lagrangian radius bounds: [{r_min:.4e}, {r_max:.4e}] Mpc for masses [{:.3e}, {:.3e}]",
        bounds.m_min, bounds.m_max
    );

    let mut cosmology = CosmologyParams {
        mass_function: backend.build_mass_function_table(
            &coarse.parameters,
            settings.refined_z_max,
            bounds.dz / 2.0,
            r_min,
            r_max,
            settings.refined_points,
        )?,
        parameters: coarse.parameters,
        los: None,
    };

    let los = backend.build_los_lookup(&bounds.los_bounds(), &cosmology, bounds.max_source_z)?;
    cosmology.los = Some(los);

    info!(
        "Cosmology initialized: z_source <= {:.3}, dz = {:.4}, {} radius samples",
        bounds.max_source_z,
        bounds.dz,
        cosmology.mass_function.mass_variance.size()
    );
    Ok(cosmology)
}

/// Flat ΛCDM reference backend without radiation.
///
/// Reads `omega_m_zero`, `hubble_constant` (km/s/Mpc) and `sigma_eight`
/// from the drawn parameters. The mass variance is a power law normalized to
/// `sigma_eight` at 8 Mpc/h.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatLambdaCdm {
    /// Effective slope of the matter power spectrum on halo scales
    pub effective_index: f64,
}

impl Default for FlatLambdaCdm {
    fn default() -> Self {
        Self {
            effective_index: -2.0,
        }
    }
}

struct Background {
    omega_m: f64,
    h: f64,
    sigma_eight: f64,
}

impl Background {
    fn read(parameters: &SampledTree) -> Result<Self, CosmologyError> {
        let omega_m = *parameters.get(&["omega_m_zero"])?;
        let hubble = *parameters.get(&["hubble_constant"])?;
        let sigma_eight = *parameters.get(&["sigma_eight"])?;

        if !(omega_m > 0.0 && omega_m <= 1.0) {
            return Err(CosmologyError::InvalidBound {
                name: "omega_m_zero",
                value: omega_m,
            });
        }
        if !(hubble > 0.0) {
            return Err(CosmologyError::InvalidBound {
                name: "hubble_constant",
                value: hubble,
            });
        }

        Ok(Self {
            omega_m,
            h: hubble / 100.0,
            sigma_eight,
        })
    }

    fn e_of_z(&self, z: f64) -> f64 {
        (self.omega_m * (1.0 + z).powi(3) + 1.0 - self.omega_m).sqrt()
    }

    fn hubble_distance(&self) -> f64 {
        SPEED_OF_LIGHT_KM_S / (100.0 * self.h)
    }

    /// Comoving distance on a uniform redshift grid, by cumulative trapezoid.
    fn comoving_distance_table(&self, z_max: f64, dz: f64) -> Result<LookupTable, CosmologyError> {
        let n_z = ((z_max / dz).ceil() as usize + 1).max(2);
        let z_top = (n_z - 1) as f64 * dz;
        let d_h = self.hubble_distance();

        let mut distances = Vec::with_capacity(n_z);
        distances.push(0.0);
        for i in 1..n_z {
            let z0 = (i - 1) as f64 * dz;
            let z1 = i as f64 * dz;
            let step = 0.5 * dz * (1.0 / self.e_of_z(z0) + 1.0 / self.e_of_z(z1));
            distances.push(distances[i - 1] + d_h * step);
        }

        Ok(LookupTable::from_samples(0.0, z_top, distances)?)
    }
}

fn check_grid(z_max: f64, dz: f64) -> Result<(), CosmologyError> {
    if !(z_max.is_finite() && z_max > 0.0) {
        return Err(CosmologyError::InvalidBound {
            name: "table redshift range",
            value: z_max,
        });
    }
    if !(dz.is_finite() && dz > 0.0) {
        return Err(CosmologyError::InvalidBound {
            name: "table redshift step",
            value: dz,
        });
    }
    Ok(())
}

impl CosmologyBackend for FlatLambdaCdm {
    fn build_mass_function_table(
        &self,
        parameters: &SampledTree,
        z_max: f64,
        dz: f64,
        r_min: f64,
        r_max: f64,
        n_r: usize,
    ) -> Result<MassFunctionTable, CosmologyError> {
        check_grid(z_max, dz)?;
        if !(r_min > 0.0) {
            return Err(CosmologyError::InvalidBound {
                name: "minimum Lagrangian radius",
                value: r_min,
            });
        }
        let background = Background::read(parameters)?;

        let r_eight = 8.0 / background.h;
        let slope = -(self.effective_index + 3.0) / 2.0;
        let sigma_eight = background.sigma_eight;
        let mass_variance = LookupTable::new(r_min.ln(), r_max.ln(), n_r, |ln_r| {
            sigma_eight * (ln_r.exp() / r_eight).powf(slope)
        })?;

        Ok(MassFunctionTable {
            comoving_distance: background.comoving_distance_table(z_max, dz)?,
            mass_variance,
            radius_bounds: (r_min, r_max),
        })
    }

    fn lagrangian_radius(
        &self,
        cosmology: &CosmologyParams,
        mass: f64,
    ) -> Result<f64, CosmologyError> {
        if !(mass > 0.0 && mass.is_finite()) {
            return Err(CosmologyError::InvalidBound {
                name: "halo mass",
                value: mass,
            });
        }
        let background = Background::read(&cosmology.parameters)?;
        let rho_m = background.omega_m * RHO_CRIT_H2_MSUN_MPC3 * background.h.powi(2);
        Ok((3.0 * mass / (4.0 * PI * rho_m)).cbrt())
    }

    fn build_los_lookup(
        &self,
        bounds: &LosBounds,
        cosmology: &CosmologyParams,
        max_source_z: f64,
    ) -> Result<LosLookup, CosmologyError> {
        check_grid(max_source_z, bounds.dz)?;
        let background = Background::read(&cosmology.parameters)?;
        let distance = background.comoving_distance_table(max_source_z, bounds.dz)?;
        let d_h = background.hubble_distance();

        let volume: Vec<f64> = distance
            .values()
            .iter()
            .enumerate()
            .map(|(i, d_c)| d_c * d_c * d_h / background.e_of_z(distance.x_at(i)))
            .collect();
        let (z_lo, z_hi) = distance.domain();

        Ok(LosLookup {
            bounds: *bounds,
            max_source_z,
            comoving_volume: LookupTable::from_samples(z_lo, z_hi, volume)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::{encode_constant, encode_normal, encode_uniform};
    use crate::param_tree::ParamTree;
    use approx::assert_relative_eq;
    use std::sync::Mutex;

    fn lensing_config() -> EncodedTree {
        ParamTree::new()
            .branch(
                "source_params",
                ParamTree::new().leaf("z_source", encode_uniform(1.0, 1.5).unwrap()),
            )
            .branch(
                "los_params",
                ParamTree::new()
                    .leaf("dz", encode_constant(0.01).unwrap())
                    .leaf("m_min", encode_constant(1e8).unwrap())
                    .leaf("m_max", encode_constant(1e9).unwrap()),
            )
            .branch(
                "subhalo_params",
                ParamTree::new()
                    .leaf("m_min", encode_constant(1e7).unwrap())
                    .leaf("m_max", encode_constant(1e10).unwrap()),
            )
    }

    fn cosmology_config() -> EncodedTree {
        ParamTree::new()
            .leaf("omega_m_zero", encode_constant(0.3).unwrap())
            .leaf("hubble_constant", encode_constant(70.0).unwrap())
            .leaf("sigma_eight", encode_normal(0.8, 0.01).unwrap())
    }

    #[derive(Default)]
    struct RecordingBackend {
        inner: FlatLambdaCdm,
        masses: Mutex<Vec<f64>>,
        tables: Mutex<Vec<(f64, f64, f64, f64, usize)>>,
    }

    impl CosmologyBackend for RecordingBackend {
        fn build_mass_function_table(
            &self,
            parameters: &SampledTree,
            z_max: f64,
            dz: f64,
            r_min: f64,
            r_max: f64,
            n_r: usize,
        ) -> Result<MassFunctionTable, CosmologyError> {
            self.tables
                .lock()
                .unwrap()
                .push((z_max, dz, r_min, r_max, n_r));
            self.inner
                .build_mass_function_table(parameters, z_max, dz, r_min, r_max, n_r)
        }

        fn lagrangian_radius(
            &self,
            cosmology: &CosmologyParams,
            mass: f64,
        ) -> Result<f64, CosmologyError> {
            self.masses.lock().unwrap().push(mass);
            self.inner.lagrangian_radius(cosmology, mass)
        }

        fn build_los_lookup(
            &self,
            bounds: &LosBounds,
            cosmology: &CosmologyParams,
            max_source_z: f64,
        ) -> Result<LosLookup, CosmologyError> {
            self.inner.build_los_lookup(bounds, cosmology, max_source_z)
        }
    }

    #[test]
    fn test_bounds_from_config() {
        let bounds = CosmologyBounds::from_config(&lensing_config()).unwrap();
        assert_eq!(bounds.max_source_z, 1.5);
        assert_eq!(bounds.dz, 0.01);
        assert_eq!(bounds.m_min, 1e7);
        assert_eq!(bounds.m_max, 1e10);
    }

    #[test]
    fn test_bounds_missing_field() {
        let config = ParamTree::new().branch(
            "source_params",
            ParamTree::new().leaf("z_source", encode_constant(1.0).unwrap()),
        );
        assert!(matches!(
            CosmologyBounds::from_config(&config),
            Err(CosmologyError::Tree(TreeError::UnknownField { .. }))
        ));
    }

    #[test]
    fn test_two_pass_refinement_queries() {
        let backend = RecordingBackend::default();
        let cosmology = initialize_cosmology_params(
            &lensing_config(),
            &cosmology_config(),
            RngKey::new(0),
            &backend,
            &RefinementSettings::default(),
        )
        .unwrap();

        let masses = backend.masses.lock().unwrap().clone();
        assert_eq!(masses.len(), 2);
        assert_relative_eq!(masses[0], 1e6, max_relative = 1e-12);
        assert_relative_eq!(masses[1], 1e11, max_relative = 1e-12);

        let tables = backend.tables.lock().unwrap().clone();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0], (1.5, 0.005, 1e-4, 1e3, 2));

        let (z_max, dz, r_min, r_max, n_r) = tables[1];
        assert_eq!((z_max, dz, n_r), (1.5, 0.005, 10_000));
        assert_eq!(cosmology.mass_function.radius_bounds, (r_min, r_max));
        assert!(r_min < r_max);
        assert!(cosmology.los.is_some());
    }

    #[test]
    fn test_refinement_settings_are_configurable() {
        let backend = RecordingBackend::default();
        let settings = RefinementSettings {
            coarse_r_min: 1e-3,
            coarse_r_max: 10.0,
            coarse_points: 3,
            mass_margin: 100.0,
            refined_z_max: 2.0,
            refined_points: 64,
        };
        initialize_cosmology_params(
            &lensing_config(),
            &cosmology_config(),
            RngKey::new(0),
            &backend,
            &settings,
        )
        .unwrap();

        let masses = backend.masses.lock().unwrap().clone();
        assert_relative_eq!(masses[0], 1e5, max_relative = 1e-12);
        assert_relative_eq!(masses[1], 1e12, max_relative = 1e-12);
        let tables = backend.tables.lock().unwrap().clone();
        assert_eq!(tables[0].4, 3);
        assert_eq!((tables[1].0, tables[1].4), (2.0, 64));
    }

    #[test]
    fn test_initialization_is_reproducible() {
        let backend = FlatLambdaCdm::default();
        let settings = RefinementSettings::default();
        let a = initialize_cosmology_params(
            &lensing_config(),
            &cosmology_config(),
            RngKey::new(12),
            &backend,
            &settings,
        )
        .unwrap();
        let b = initialize_cosmology_params(
            &lensing_config(),
            &cosmology_config(),
            RngKey::new(12),
            &backend,
            &settings,
        )
        .unwrap();

        assert_eq!(a.parameters, b.parameters);
        assert_eq!(a.mass_function.radius_bounds, b.mass_function.radius_bounds);
    }

    #[test]
    fn test_comoving_distance_matches_reference() {
        let backend = FlatLambdaCdm::default();
        let parameters = draw_sample(&cosmology_config(), RngKey::new(1));
        let table = backend
            .build_mass_function_table(&parameters, 1.5, 0.005, 1e-3, 1.0, 16)
            .unwrap();

        // Flat ΛCDM with H0 = 70, Ωm = 0.3 gives ~3303.8 Mpc at z = 1
        let d_c = table.comoving_distance.eval(1.0).unwrap();
        assert_relative_eq!(d_c, 3303.8, max_relative = 2e-3);
        assert_eq!(table.comoving_distance.eval(0.0).unwrap(), 0.0);
    }

    #[test]
    fn test_lagrangian_radius_scaling() {
        let backend = FlatLambdaCdm::default();
        let cosmology = initialize_cosmology_params(
            &lensing_config(),
            &cosmology_config(),
            RngKey::new(3),
            &backend,
            &RefinementSettings::default(),
        )
        .unwrap();

        let r1 = backend.lagrangian_radius(&cosmology, 1e9).unwrap();
        let r8 = backend.lagrangian_radius(&cosmology, 8e9).unwrap();
        assert_relative_eq!(r8 / r1, 2.0, max_relative = 1e-12);
        assert!(backend.lagrangian_radius(&cosmology, -1.0).is_err());
    }

    #[test]
    fn test_los_lookup_spans_source_redshift() {
        let backend = FlatLambdaCdm::default();
        let cosmology = initialize_cosmology_params(
            &lensing_config(),
            &cosmology_config(),
            RngKey::new(3),
            &backend,
            &RefinementSettings::default(),
        )
        .unwrap();

        let los = cosmology.los.unwrap();
        assert_eq!(los.bounds.m_min, 1e7);
        assert_eq!(los.bounds.m_max, 1e10);
        assert!(los.comoving_volume.contains(1.5));
        assert!(los.comoving_volume.eval(1.0).unwrap() > los.comoving_volume.eval(0.5).unwrap());
    }

    #[test]
    fn test_invalid_cosmology_rejected() {
        let backend = FlatLambdaCdm::default();
        let parameters = ParamTree::new()
            .leaf("omega_m_zero", -0.1)
            .leaf("hubble_constant", 70.0)
            .leaf("sigma_eight", 0.8);
        assert!(matches!(
            backend.build_mass_function_table(&parameters, 1.0, 0.01, 1e-3, 1.0, 4),
            Err(CosmologyError::InvalidBound {
                name: "omega_m_zero",
                ..
            })
        ));
    }
}
