// ─────────────────────────────────────────────────────────────────────
// SCPN Impact Core — Config
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Run and body configuration.
//!
//! Every field carries a serde default so that missing keys in a JSON
//! config take the documented value and unknown keys are ignored. The
//! enumerated choices select implementations at setup time; the core
//! never re-reads configuration inside the hot loop.

use crate::error::ImpactResult;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum KernelEnum {
    #[default]
    CubicSpline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FinderEnum {
    #[default]
    KdTree,
    UniformGrid,
    Bvh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TimesteppingEnum {
    #[default]
    Euler,
    PredictorCorrector,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ArtificialViscosityEnum {
    None,
    #[default]
    Standard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum GravityEnum {
    None,
    BruteForce,
    #[default]
    BarnesHut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CollisionHandlerEnum {
    None,
    ElasticBounce,
    PerfectMerging,
    #[default]
    MergeOrBounce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OverlapHandlerEnum {
    None,
    #[default]
    Repel,
    ForceMerge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EosEnum {
    #[default]
    IdealGas,
    Tillotson,
    Murnaghan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum YieldingEnum {
    #[default]
    None,
    Elastic,
    VonMises,
    DruckerPrager,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DamageEnum {
    #[default]
    None,
    ScalarGradyKipp,
}

fn default_run_name() -> String {
    "impact".to_string()
}

/// Top-level run configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunConfig {
    #[serde(default = "default_run_name")]
    pub run_name: String,
    #[serde(default)]
    pub timestepping: TimesteppingConfig,
    #[serde(default)]
    pub sph: SphConfig,
    #[serde(default)]
    pub gravity: GravityConfig,
    #[serde(default)]
    pub collision: CollisionConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimesteppingConfig {
    pub integrator: TimesteppingEnum,
    /// Initial timestep [s].
    pub initial_dt: f64,
    /// Hard upper bound on the timestep [s].
    pub max_dt: f64,
    /// Courant criterion multiplier.
    pub courant_factor: f64,
    /// Derivative criterion multiplier; zero disables the criterion.
    pub derivative_factor: f64,
    /// Acceleration criterion multiplier; zero disables the criterion.
    pub acceleration_factor: f64,
}

impl Default for TimesteppingConfig {
    fn default() -> Self {
        TimesteppingConfig {
            integrator: TimesteppingEnum::default(),
            initial_dt: 0.01,
            max_dt: 0.1,
            courant_factor: 0.2,
            derivative_factor: 0.2,
            acceleration_factor: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SphConfig {
    pub kernel: KernelEnum,
    pub finder: FinderEnum,
    pub artificial_viscosity: ArtificialViscosityEnum,
    /// Linear AV coefficient.
    pub av_alpha: f64,
    /// Quadratic AV coefficient.
    pub av_beta: f64,
    /// XSPH smoothing strength; zero disables the correction.
    pub xsph_epsilon: f64,
    /// Evolve smoothing lengths with the continuity equation.
    pub adaptive_smoothing_length: bool,
    /// Use the angular-momentum-conserving strain rate correction.
    pub conserve_angular_momentum: bool,
}

impl Default for SphConfig {
    fn default() -> Self {
        SphConfig {
            kernel: KernelEnum::default(),
            finder: FinderEnum::default(),
            artificial_viscosity: ArtificialViscosityEnum::default(),
            av_alpha: 1.5,
            av_beta: 3.0,
            xsph_epsilon: 0.0,
            adaptive_smoothing_length: true,
            conserve_angular_momentum: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GravityConfig {
    pub solver: GravityEnum,
    /// Multipole expansion order, one of 0, 2, 3, 4.
    pub order: usize,
    /// Barnes-Hut opening angle.
    pub opening_angle: f64,
    /// Maximal number of particles in a tree leaf.
    pub leaf_size: usize,
    /// Gravitational constant; overridable for scaled-unit runs.
    pub constant: f64,
}

impl Default for GravityConfig {
    fn default() -> Self {
        GravityConfig {
            solver: GravityEnum::default(),
            order: 3,
            opening_angle: 0.5,
            leaf_size: 25,
            constant: crate::constants::GRAVITY_CONSTANT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollisionConfig {
    pub handler: CollisionHandlerEnum,
    pub overlap_handler: OverlapHandlerEnum,
    /// Overlaps below this fraction of (h1+h2) are treated as noise.
    pub allowed_overlap: f64,
    /// Restitution coefficient in the normal direction.
    pub restitution_normal: f64,
    /// Restitution coefficient in the tangential direction.
    pub restitution_tangent: f64,
    /// Relative impact speed (in units of escape velocity) below which
    /// the merge-or-bounce handler merges.
    pub merging_limit: f64,
}

impl Default for CollisionConfig {
    fn default() -> Self {
        CollisionConfig {
            handler: CollisionHandlerEnum::default(),
            overlap_handler: OverlapHandlerEnum::default(),
            allowed_overlap: 0.01,
            restitution_normal: 0.5,
            restitution_tangent: 1.0,
            merging_limit: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Worker thread count; zero selects the hardware concurrency.
    pub threads: usize,
    /// Particles per parallel task.
    pub granularity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            threads: 0,
            granularity: 100,
        }
    }
}

/// Tillotson equation-of-state coefficients. Defaults are basalt, after
/// Benz & Asphaug (1999).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TillotsonParams {
    pub small_a: f64,
    pub small_b: f64,
    pub alpha: f64,
    pub beta: f64,
    /// Sublimation energy [J/kg].
    pub sublimation: f64,
    /// Energy of incipient vaporization [J/kg].
    pub energy_iv: f64,
    /// Energy of complete vaporization [J/kg].
    pub energy_cv: f64,
    /// Bulk modulus A [Pa].
    pub bulk_modulus: f64,
    /// Non-linear compressive term B [Pa].
    pub nonlinear_b: f64,
}

impl Default for TillotsonParams {
    fn default() -> Self {
        TillotsonParams {
            small_a: 0.5,
            small_b: 1.5,
            alpha: 5.0,
            beta: 5.0,
            sublimation: 4.87e8,
            energy_iv: 4.72e6,
            energy_cv: 1.82e7,
            bulk_modulus: 2.67e10,
            nonlinear_b: 2.67e10,
        }
    }
}

/// Per-body material configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BodyConfig {
    pub particle_count: usize,
    /// Reference density rho_0 [kg/m^3].
    pub density: f64,
    /// Initial specific internal energy [J/kg].
    pub energy: f64,
    pub eos: EosEnum,
    /// Adiabatic index for the ideal-gas EoS.
    pub adiabatic_index: f64,
    #[serde(default)]
    pub tillotson: TillotsonParams,
    pub rheology: YieldingEnum,
    pub damage: DamageEnum,
    /// Shear modulus [Pa].
    pub shear_modulus: f64,
    /// Von Mises elasticity limit Y_M [Pa].
    pub elasticity_limit: f64,
    /// Specific melting energy [J/kg].
    pub melt_energy: f64,
    /// Drucker-Prager cohesion Y_0 [Pa].
    pub cohesion: f64,
    /// Internal friction coefficient of the intact material.
    pub internal_friction: f64,
    /// Friction coefficient of the fully damaged material.
    pub dry_friction: f64,
    /// Weibull coefficient k [m^-3].
    pub weibull_coefficient: f64,
    /// Weibull exponent m.
    pub weibull_exponent: f64,
    /// Crack growth speed as a fraction of the longitudinal sound speed.
    pub rayleigh_sound_speed: f64,
    /// Minimal deviatoric stress magnitude for timestepping [Pa].
    pub stress_min: f64,
    /// Minimal energy scale for timestepping [J/kg].
    pub energy_min: f64,
    /// Minimal (cube root of) damage scale for timestepping.
    pub damage_min: f64,
}

impl Default for BodyConfig {
    fn default() -> Self {
        BodyConfig {
            particle_count: 10000,
            density: crate::constants::BASALT_DENSITY,
            energy: 0.0,
            eos: EosEnum::default(),
            adiabatic_index: 1.4,
            tillotson: TillotsonParams::default(),
            rheology: YieldingEnum::default(),
            damage: DamageEnum::default(),
            shear_modulus: 2.27e10,
            elasticity_limit: 3.5e9,
            melt_energy: 3.4e6,
            cohesion: 9.0e7,
            internal_friction: 2.0,
            dry_friction: 0.8,
            weibull_coefficient: 4.0e35,
            weibull_exponent: 9.0,
            rayleigh_sound_speed: 0.4,
            stress_min: 1.0e5,
            energy_min: 1.0,
            damage_min: 0.03,
        }
    }
}

impl RunConfig {
    /// Load from a JSON file; missing keys take defaults.
    pub fn from_file(path: &str) -> ImpactResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        Ok(config)
    }
}

impl BodyConfig {
    pub fn from_file(path: &str) -> ImpactResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_takes_defaults() {
        let cfg: RunConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.run_name, "impact");
        assert_eq!(cfg.timestepping.integrator, TimesteppingEnum::Euler);
        assert_eq!(cfg.gravity.order, 3);
        assert!((cfg.sph.av_alpha - 1.5).abs() < 1e-12);
        assert!((cfg.collision.allowed_overlap - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let cfg: RunConfig =
            serde_json::from_str(r#"{"no_such_key": 42, "run_name": "t1"}"#).unwrap();
        assert_eq!(cfg.run_name, "t1");
    }

    #[test]
    fn test_partial_section_overrides() {
        let cfg: RunConfig = serde_json::from_str(
            r#"{"gravity": {"solver": "BruteForce", "order": 2,
                "opening_angle": 0.4, "leaf_size": 10, "constant": 1.0}}"#,
        )
        .unwrap();
        assert_eq!(cfg.gravity.solver, GravityEnum::BruteForce);
        assert_eq!(cfg.gravity.order, 2);
        // untouched sections keep their defaults
        assert!((cfg.timestepping.courant_factor - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_body_config_roundtrip() {
        let body = BodyConfig {
            eos: EosEnum::Tillotson,
            rheology: YieldingEnum::VonMises,
            damage: DamageEnum::ScalarGradyKipp,
            ..BodyConfig::default()
        };
        let text = serde_json::to_string(&body).unwrap();
        let back: BodyConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(back.eos, EosEnum::Tillotson);
        assert_eq!(back.rheology, YieldingEnum::VonMises);
        assert!((back.weibull_exponent - 9.0).abs() < 1e-12);
    }
}
