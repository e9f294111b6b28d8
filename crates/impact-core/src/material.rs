// ─────────────────────────────────────────────────────────────────────
// SCPN Impact Core — Material Model
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Equations of state, rheologies and the scalar fracture model.
//!
//! A material owns the parameter map of one body: its EoS, an optional
//! rheology (which in turn owns the damage model), and the per-quantity
//! allowed ranges and minimal scales consumed by the timestepping.
//! Damage is stored as the cube root D^(1/3); consumers cube the stored
//! value.

use crate::storage::{OrderEnum, QuantityId, Storage};
use impact_math::tensor::{SymmetricTensor, TracelessTensor};
use impact_math::Interval;
use impact_types::config::{BodyConfig, DamageEnum, EosEnum, YieldingEnum};
use impact_types::error::{ImpactError, ImpactResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::ops::Range;

const EPS: f64 = 1.0e-15;

/// Pressure and sound speed from density and specific internal energy.
pub trait Eos: Send + Sync {
    fn evaluate(&self, rho: f64, u: f64) -> (f64, f64);
}

pub struct IdealGasEos {
    gamma: f64,
}

impl IdealGasEos {
    pub fn new(gamma: f64) -> Self {
        IdealGasEos { gamma }
    }
}

impl Eos for IdealGasEos {
    fn evaluate(&self, rho: f64, u: f64) -> (f64, f64) {
        let p = (self.gamma - 1.0) * u * rho;
        (p, (self.gamma * p / rho).max(0.0).sqrt())
    }
}

/// Tillotson (1962) equation of state with compressed, expanded-cold
/// and expanded-hot regimes selected by the (rho, u) position relative
/// to the reference density and the vaporization energies.
pub struct TillotsonEos {
    u0: f64,
    u_iv: f64,
    u_cv: f64,
    a: f64,
    b: f64,
    rho0: f64,
    big_a: f64,
    big_b: f64,
    alpha: f64,
    beta: f64,
}

impl TillotsonEos {
    pub fn new(config: &BodyConfig) -> Self {
        let t = &config.tillotson;
        TillotsonEos {
            u0: t.sublimation,
            u_iv: t.energy_iv,
            u_cv: t.energy_cv,
            a: t.small_a,
            b: t.small_b,
            rho0: config.density,
            big_a: t.bulk_modulus,
            big_b: t.nonlinear_b,
            alpha: t.alpha,
            beta: t.beta,
        }
    }

    fn compressed(&self, rho: f64, u: f64) -> (f64, f64) {
        let eta = rho / self.rho0;
        let mu = eta - 1.0;
        let denom = u / (self.u0 * eta * eta) + 1.0;
        let p = (self.a + self.b / denom) * rho * u + self.big_a * mu + self.big_b * mu * mu;
        let dp_du = self.a * rho + self.b * rho / (denom * denom);
        let dp_drho = self.a * u
            + self.b * u * (3.0 * denom - 2.0) / (denom * denom)
            + self.big_a / self.rho0
            + 2.0 * self.big_b * mu / self.rho0;
        let cs_sqr = dp_drho + dp_du * p / (rho * rho);
        (p, cs_sqr)
    }

    fn expanded(&self, rho: f64, u: f64) -> (f64, f64) {
        let eta = rho / self.rho0;
        let mu = eta - 1.0;
        let denom = u / (self.u0 * eta * eta) + 1.0;
        let rho_exp = self.rho0 / rho - 1.0;
        let beta_exp = (-(self.beta * rho_exp).min(70.0)).exp();
        let alpha_exp = (-(self.alpha * rho_exp * rho_exp).min(70.0)).exp();
        let p = self.a * rho * u
            + (self.b * rho * u / denom + self.big_a * mu * beta_exp) * alpha_exp;
        let dp_du = self.a * rho + alpha_exp * self.b * rho / (denom * denom);
        let dp_drho = self.a * u
            + alpha_exp * (self.b * u * (3.0 * denom - 2.0) / (denom * denom))
            + alpha_exp * (self.b * u * rho / denom) * self.rho0 * (2.0 * self.alpha * rho_exp)
                / (rho * rho)
            + alpha_exp
                * self.big_a
                * beta_exp
                * (1.0 / self.rho0
                    + self.rho0 * mu / (rho * rho) * (2.0 * self.alpha * rho_exp + self.beta));
        let cs_sqr = (dp_drho + dp_du * p / (rho * rho)).max(0.0);
        (p, cs_sqr)
    }
}

impl Eos for TillotsonEos {
    fn evaluate(&self, rho: f64, u: f64) -> (f64, f64) {
        let (pc, csc) = self.compressed(rho, u);
        let (p, cs_sqr) = if rho <= self.rho0 && u > self.u_cv {
            self.expanded(rho, u)
        } else if rho <= self.rho0 && u > self.u_iv {
            // interpolate between the phases
            let (pe, cse) = self.expanded(rho, u);
            let span = self.u_cv - self.u_iv;
            (
                ((u - self.u_iv) * pe + (self.u_cv - u) * pc) / span,
                ((u - self.u_iv) * cse + (self.u_cv - u) * csc) / span,
            )
        } else {
            (pc, csc)
        };
        // floor the sound speed to keep the Courant criterion finite
        let cs_sqr = cs_sqr.max(0.25 * self.big_a / self.rho0);
        (p, cs_sqr.sqrt())
    }
}

pub struct MurnaghanEos {
    rho0: f64,
    bulk_modulus: f64,
}

impl MurnaghanEos {
    pub fn new(rho0: f64, bulk_modulus: f64) -> Self {
        MurnaghanEos { rho0, bulk_modulus }
    }
}

impl Eos for MurnaghanEos {
    fn evaluate(&self, rho: f64, _u: f64) -> (f64, f64) {
        let cs = (self.bulk_modulus / self.rho0).sqrt();
        (cs * cs * (rho - self.rho0), cs)
    }
}

/// Deterministic per-body context used when creating quantities.
pub struct MaterialContext {
    pub rng: StdRng,
    pub body_index: u64,
    /// Kernel support radius in units of h.
    pub kernel_radius: f64,
}

impl MaterialContext {
    pub fn new(seed: u64, body_index: u64, kernel_radius: f64) -> Self {
        MaterialContext {
            rng: StdRng::seed_from_u64(seed.wrapping_add(body_index)),
            body_index,
            kernel_radius,
        }
    }
}

/// Scalar fracture model contract.
pub trait DamageModel: Send + Sync {
    fn create(
        &self,
        storage: &mut Storage,
        range: Range<usize>,
        config: &BodyConfig,
        context: &mut MaterialContext,
    ) -> ImpactResult<()>;

    /// Accumulate the damage derivative from the current stress state.
    fn integrate(
        &self,
        storage: &mut Storage,
        range: Range<usize>,
        config: &BodyConfig,
    ) -> ImpactResult<()>;
}

pub struct NullDamage;

impl DamageModel for NullDamage {
    fn create(
        &self,
        _storage: &mut Storage,
        _range: Range<usize>,
        _config: &BodyConfig,
        _context: &mut MaterialContext,
    ) -> ImpactResult<()> {
        Ok(())
    }

    fn integrate(
        &self,
        _storage: &mut Storage,
        _range: Range<usize>,
        _config: &BodyConfig,
    ) -> ImpactResult<()> {
        Ok(())
    }
}

/// Grady-Kipp scalar damage with a Weibull distribution of flaw
/// activation thresholds.
pub struct ScalarGradyKipp;

impl DamageModel for ScalarGradyKipp {
    fn create(
        &self,
        storage: &mut Storage,
        range: Range<usize>,
        config: &BodyConfig,
        context: &mut MaterialContext,
    ) -> ImpactResult<()> {
        storage.insert_uniform(QuantityId::Damage, OrderEnum::First, 0.0_f64)?;
        storage.insert_uniform(QuantityId::EpsMin, OrderEnum::Zero, 0.0_f64)?;
        storage.insert_uniform(QuantityId::WeibullExponent, OrderEnum::Zero, 0.0_f64)?;
        storage.insert_uniform(QuantityId::ExplicitGrowth, OrderEnum::Zero, 0.0_f64)?;
        storage.insert_uniform(QuantityId::FlawCount, OrderEnum::Zero, 0_u64)?;

        let size = range.len();
        if size == 0 {
            return Ok(());
        }

        // crack growth speed, a fraction of the longitudinal sound speed
        let mu = config.shear_modulus;
        let big_a = config.tillotson.bulk_modulus;
        let cg = config.rayleigh_sound_speed * ((big_a + 4.0 / 3.0 * mu) / config.density).sqrt();

        {
            let positions = storage.value::<impact_math::Vector>(QuantityId::Position)?;
            let growth_values: Vec<f64> = range
                .clone()
                .map(|i| cg / (context.kernel_radius * positions[i].h()))
                .collect();
            let growth = storage.value_mut::<f64>(QuantityId::ExplicitGrowth)?;
            for (offset, value) in growth_values.into_iter().enumerate() {
                growth[range.start + offset] = value;
            }
        }

        // body volume normalises the Weibull flaw density
        let volume: f64 = {
            let mass = storage.value::<f64>(QuantityId::Mass)?;
            let rho = storage.value::<f64>(QuantityId::Density)?;
            range.clone().map(|i| mass[i] / rho[i]).sum()
        };
        if volume <= 0.0 {
            return Err(ImpactError::invalid_setup(
                "flaw sampling requires a positive body volume".to_string(),
            ));
        }

        let k = config.weibull_coefficient;
        let m = config.weibull_exponent;
        // split the power to avoid overflowing k * V for large bodies
        let denom = 1.0 / (k.powf(1.0 / m) * volume.powf(1.0 / m));

        // sample flaws until every particle has at least one; the p-th
        // flaw activates at eps = (p / (k V))^(1/m)
        let mut eps_min = vec![0.0_f64; size];
        let mut eps_max = vec![0.0_f64; size];
        let mut n_flaws = vec![0_u64; size];
        let mut flawed = 0;
        let mut p = 1_u64;
        while flawed < size {
            let i = context.rng.gen_range(0..size);
            let eps = denom * (p as f64).powf(1.0 / m);
            if n_flaws[i] == 0 {
                flawed += 1;
                eps_min[i] = eps;
            }
            eps_max[i] = eps;
            n_flaws[i] += 1;
            p += 1;
        }

        {
            let m_zero = storage.value_mut::<f64>(QuantityId::WeibullExponent)?;
            for i in 0..size {
                m_zero[range.start + i] = if n_flaws[i] == 1 {
                    1.0
                } else {
                    (n_flaws[i] as f64).ln() / (eps_max[i] / eps_min[i]).ln()
                };
            }
        }
        {
            let eps = storage.value_mut::<f64>(QuantityId::EpsMin)?;
            for i in 0..size {
                eps[range.start + i] = eps_min[i];
            }
        }
        {
            let flaws = storage.value_mut::<u64>(QuantityId::FlawCount)?;
            for i in 0..size {
                flaws[range.start + i] = n_flaws[i];
            }
        }
        Ok(())
    }

    fn integrate(
        &self,
        storage: &mut Storage,
        range: Range<usize>,
        config: &BodyConfig,
    ) -> ImpactResult<()> {
        let mu = config.shear_modulus;
        let big_a = config.tillotson.bulk_modulus;
        let young = mu * 9.0 * big_a / (3.0 * big_a + mu);

        let [damage_q, stress_q, pressure_q, eps_min_q, m_zero_q, growth_q, flaws_q] = storage
            .get_many_mut([
                QuantityId::Damage,
                QuantityId::DeviatoricStress,
                QuantityId::Pressure,
                QuantityId::EpsMin,
                QuantityId::WeibullExponent,
                QuantityId::ExplicitGrowth,
                QuantityId::FlawCount,
            ])?;
        let damage_buffers = f64::buffers_mut_checked(damage_q)?;
        let stress_buffers = TracelessTensor::buffers_mut_checked(stress_q)?;
        let pressure = &f64::buffers_checked(pressure_q)?.values;
        let eps_min = &f64::buffers_checked(eps_min_q)?.values;
        let m_zero = &f64::buffers_checked(m_zero_q)?.values;
        let growth = &f64::buffers_checked(growth_q)?.values;
        let n_flaws = &u64::buffers_checked(flaws_q)?.values;

        for i in range {
            let d_cbrt = damage_buffers.values[i];
            if d_cbrt >= 1.0 {
                // fully damaged; keep the derivative large so that the
                // corrector cannot undo the clamped value, and kill the
                // stress so it does not limit the timestep
                damage_buffers.dt[i] = 1.0e10;
                stress_buffers.values[i] = TracelessTensor::null();
                stress_buffers.dt[i] = TracelessTensor::null();
                continue;
            }
            let d = d_cbrt.powi(3);
            let damaged_stress = stress_buffers.values[i] * (1.0 - d);
            let sigma =
                damaged_stress.to_symmetric() - SymmetricTensor::isotropic(pressure[i]);
            let sig_max = sigma.max_eigenvalue();
            let young_reduced = ((1.0 - d) * young).max(1.0e-20);
            let strain = sig_max / young_reduced;
            let ratio = strain / eps_min[i];
            if ratio <= 1.0 {
                continue;
            }
            let activated = ratio.powf(m_zero[i]).min(n_flaws[i] as f64);
            damage_buffers.dt[i] = growth[i] * activated.cbrt();
        }
        Ok(())
    }
}

// typed helpers over the joint borrow
trait BuffersChecked: crate::storage::QuantityValue {
    fn buffers_checked(
        quantity: &crate::storage::Quantity,
    ) -> ImpactResult<&crate::storage::QuantityBuffers<Self>> {
        Self::buffers(quantity).ok_or_else(|| {
            ImpactError::invalid_setup("quantity stored with unexpected type".to_string())
        })
    }

    fn buffers_mut_checked(
        quantity: &mut crate::storage::Quantity,
    ) -> ImpactResult<&mut crate::storage::QuantityBuffers<Self>> {
        Self::buffers_mut(quantity).ok_or_else(|| {
            ImpactError::invalid_setup("quantity stored with unexpected type".to_string())
        })
    }
}

impl<T: crate::storage::QuantityValue> BuffersChecked for T {}

/// Plasticity contract; the damage model is owned by the rheology.
pub trait Rheology: Send + Sync {
    fn create(
        &self,
        storage: &mut Storage,
        range: Range<usize>,
        config: &BodyConfig,
        context: &mut MaterialContext,
    ) -> ImpactResult<()>;

    /// Per-step yield reduction, called before the derivative loop.
    fn initialize(
        &self,
        storage: &mut Storage,
        range: Range<usize>,
        config: &BodyConfig,
    ) -> ImpactResult<()>;

    /// Damage growth, called after the derivative loop.
    fn integrate(
        &self,
        storage: &mut Storage,
        range: Range<usize>,
        config: &BodyConfig,
    ) -> ImpactResult<()>;
}

fn create_strength_quantities(
    storage: &mut Storage,
    config: &BodyConfig,
) -> ImpactResult<()> {
    storage.insert_uniform(QuantityId::StressReducing, OrderEnum::Zero, 1.0_f64)?;
    storage.insert_uniform(
        QuantityId::DeviatoricStress,
        OrderEnum::First,
        TracelessTensor::null(),
    )?;
    // every strength material carries a damage quantity; with a null
    // damage model it simply stays zero
    if !storage.has(QuantityId::Damage) {
        storage.insert_uniform(QuantityId::Damage, OrderEnum::First, 0.0_f64)?;
    }
    let _ = config;
    Ok(())
}

/// Radial return: scale the stress back to the yield surface.
fn apply_yield(
    storage: &mut Storage,
    range: Range<usize>,
    yield_stress: impl Fn(usize, &[f64], &[f64]) -> f64,
) -> ImpactResult<()> {
    let [stress_q, reduce_q, damage_q, pressure_q, energy_q] = storage.get_many_mut([
        QuantityId::DeviatoricStress,
        QuantityId::StressReducing,
        QuantityId::Damage,
        QuantityId::Pressure,
        QuantityId::Energy,
    ])?;
    let stress = &mut TracelessTensor::buffers_mut_checked(stress_q)?.values;
    let reduce = &mut f64::buffers_mut_checked(reduce_q)?.values;
    let damage = &f64::buffers_checked(damage_q)?.values;
    let pressure = &mut f64::buffers_mut_checked(pressure_q)?.values;
    let energy = &f64::buffers_checked(energy_q)?.values;

    for i in range {
        let d = damage[i].powi(3);
        // pressure is reduced only in tension
        if pressure[i] < 0.0 {
            pressure[i] *= 1.0 - d;
        }
        let y = yield_stress(i, pressure, energy);
        if y < EPS {
            reduce[i] = 0.0;
            stress[i] = TracelessTensor::null();
            continue;
        }
        let damaged = stress[i] * (1.0 - d) + TracelessTensor::splat(EPS);
        let scaled = damaged / y + TracelessTensor::splat(EPS);
        let inv = 0.5 * scaled.ddot(&scaled) + EPS;
        let red = (1.0 / (3.0 * inv)).sqrt().min(1.0);
        stress[i] = stress[i] * red;
        reduce[i] = red * (1.0 - d);
    }
    Ok(())
}

pub struct VonMisesRheology {
    damage: Box<dyn DamageModel>,
}

impl VonMisesRheology {
    pub fn new(damage: Box<dyn DamageModel>) -> Self {
        VonMisesRheology { damage }
    }
}

impl Rheology for VonMisesRheology {
    fn create(
        &self,
        storage: &mut Storage,
        range: Range<usize>,
        config: &BodyConfig,
        context: &mut MaterialContext,
    ) -> ImpactResult<()> {
        create_strength_quantities(storage, config)?;
        self.damage.create(storage, range, config, context)
    }

    fn initialize(
        &self,
        storage: &mut Storage,
        range: Range<usize>,
        config: &BodyConfig,
    ) -> ImpactResult<()> {
        let limit = config.elasticity_limit;
        let u_melt = config.melt_energy;
        apply_yield(storage, range, move |i, _pressure, energy| {
            let unorm = energy[i] / u_melt;
            if unorm < 1.0e-5 {
                limit
            } else {
                limit * (1.0 - unorm).max(0.0)
            }
        })
    }

    fn integrate(
        &self,
        storage: &mut Storage,
        range: Range<usize>,
        config: &BodyConfig,
    ) -> ImpactResult<()> {
        self.damage.integrate(storage, range, config)
    }
}

pub struct DruckerPragerRheology {
    damage: Box<dyn DamageModel>,
}

impl DruckerPragerRheology {
    pub fn new(damage: Box<dyn DamageModel>) -> Self {
        DruckerPragerRheology { damage }
    }
}

impl Rheology for DruckerPragerRheology {
    fn create(
        &self,
        storage: &mut Storage,
        range: Range<usize>,
        config: &BodyConfig,
        context: &mut MaterialContext,
    ) -> ImpactResult<()> {
        create_strength_quantities(storage, config)?;
        self.damage.create(storage, range, config, context)
    }

    fn initialize(
        &self,
        storage: &mut Storage,
        range: Range<usize>,
        config: &BodyConfig,
    ) -> ImpactResult<()> {
        let y_0 = config.cohesion;
        let mu_i = config.internal_friction;
        let y_m = config.elasticity_limit;
        let mu_d = config.dry_friction;

        // the damage cube blends the intact and the fully damaged yield
        let damage: Vec<f64> = storage.value::<f64>(QuantityId::Damage)?.to_vec();
        apply_yield(storage, range, move |i, pressure, _energy| {
            let p = pressure[i];
            let y_intact = (y_0 + mu_i * p / (1.0 + mu_i * p / (y_m - y_0))).max(0.0);
            let y_damaged = (mu_d * p).max(0.0);
            if y_damaged > y_intact {
                // above this pressure the shear strength follows the
                // same dependence regardless of damage
                y_intact
            } else {
                let d = damage[i].powi(3);
                (1.0 - d) * y_intact + d * y_damaged
            }
        })
    }

    fn integrate(
        &self,
        storage: &mut Storage,
        range: Range<usize>,
        config: &BodyConfig,
    ) -> ImpactResult<()> {
        self.damage.integrate(storage, range, config)
    }
}

/// Purely elastic response; stress evolves with no yield reduction.
pub struct ElasticRheology;

impl Rheology for ElasticRheology {
    fn create(
        &self,
        storage: &mut Storage,
        _range: Range<usize>,
        config: &BodyConfig,
        _context: &mut MaterialContext,
    ) -> ImpactResult<()> {
        create_strength_quantities(storage, config)
    }

    fn initialize(
        &self,
        _storage: &mut Storage,
        _range: Range<usize>,
        _config: &BodyConfig,
    ) -> ImpactResult<()> {
        Ok(())
    }

    fn integrate(
        &self,
        _storage: &mut Storage,
        _range: Range<usize>,
        _config: &BodyConfig,
    ) -> ImpactResult<()> {
        Ok(())
    }
}

/// Parameter map and model implementations of one body.
pub struct Material {
    pub config: BodyConfig,
    eos: Box<dyn Eos>,
    rheology: Option<Box<dyn Rheology>>,
    ranges: BTreeMap<QuantityId, Interval>,
    minimals: BTreeMap<QuantityId, f64>,
}

impl Material {
    /// Factory mapping the configured EoS / rheology / damage ids to
    /// implementations; called once per body at setup.
    pub fn from_config(config: &BodyConfig) -> ImpactResult<Self> {
        if config.density <= 0.0 {
            return Err(ImpactError::invalid_setup(
                "material density must be positive".to_string(),
            ));
        }
        let eos: Box<dyn Eos> = match config.eos {
            EosEnum::IdealGas => Box::new(IdealGasEos::new(config.adiabatic_index)),
            EosEnum::Tillotson => Box::new(TillotsonEos::new(config)),
            EosEnum::Murnaghan => Box::new(MurnaghanEos::new(
                config.density,
                config.tillotson.bulk_modulus,
            )),
        };
        let damage: Box<dyn DamageModel> = match config.damage {
            DamageEnum::None => Box::new(NullDamage),
            DamageEnum::ScalarGradyKipp => Box::new(ScalarGradyKipp),
        };
        if config.rheology == YieldingEnum::None && config.damage != DamageEnum::None {
            return Err(ImpactError::invalid_setup(
                "a damage model requires a rheology".to_string(),
            ));
        }
        let rheology: Option<Box<dyn Rheology>> = match config.rheology {
            YieldingEnum::None => None,
            YieldingEnum::Elastic => Some(Box::new(ElasticRheology)),
            YieldingEnum::VonMises => Some(Box::new(VonMisesRheology::new(damage))),
            YieldingEnum::DruckerPrager => Some(Box::new(DruckerPragerRheology::new(damage))),
        };

        let mut ranges = BTreeMap::new();
        let mut minimals = BTreeMap::new();
        ranges.insert(
            QuantityId::Density,
            Interval::new(1.0e-3 * config.density, f64::INFINITY),
        );
        minimals.insert(QuantityId::Density, 0.05 * config.density);
        ranges.insert(QuantityId::Energy, Interval::non_negative());
        minimals.insert(QuantityId::Energy, config.energy_min);
        if config.rheology != YieldingEnum::None {
            minimals.insert(QuantityId::DeviatoricStress, config.stress_min);
        }
        if config.damage != DamageEnum::None {
            ranges.insert(QuantityId::Damage, Interval::new(0.0, 1.0));
            minimals.insert(QuantityId::Damage, config.damage_min);
        }

        Ok(Material {
            config: config.clone(),
            eos,
            rheology,
            ranges,
            minimals,
        })
    }

    pub fn has_rheology(&self) -> bool {
        self.rheology.is_some()
    }

    /// Allowed range of a quantity; unbounded when not declared.
    pub fn range(&self, id: QuantityId) -> Interval {
        self.ranges.get(&id).copied().unwrap_or_default()
    }

    /// Minimal scale of a quantity for the derivative criterion.
    pub fn minimal(&self, id: QuantityId) -> f64 {
        self.minimals.get(&id).copied().unwrap_or(0.0)
    }

    /// Create material-owned quantities in the storage.
    pub fn create(
        &self,
        storage: &mut Storage,
        range: Range<usize>,
        context: &mut MaterialContext,
    ) -> ImpactResult<()> {
        if !storage.has(QuantityId::Density) {
            storage.insert_uniform(QuantityId::Density, OrderEnum::First, self.config.density)?;
        }
        if !storage.has(QuantityId::Energy) {
            storage.insert_uniform(QuantityId::Energy, OrderEnum::First, self.config.energy)?;
        }
        storage.insert_uniform(QuantityId::Pressure, OrderEnum::Zero, 0.0_f64)?;
        storage.insert_uniform(QuantityId::SoundSpeed, OrderEnum::Zero, 0.0_f64)?;
        if let Some(rheology) = &self.rheology {
            rheology.create(storage, range, &self.config, context)?;
        }
        Ok(())
    }

    /// Per-step update before the derivative loop: EoS evaluation and
    /// yield reduction.
    pub fn initialize(&self, storage: &mut Storage, range: Range<usize>) -> ImpactResult<()> {
        {
            let [pressure_q, sound_q, density_q, energy_q] = storage.get_many_mut([
                QuantityId::Pressure,
                QuantityId::SoundSpeed,
                QuantityId::Density,
                QuantityId::Energy,
            ])?;
            let pressure = &mut f64::buffers_mut_checked(pressure_q)?.values;
            let sound = &mut f64::buffers_mut_checked(sound_q)?.values;
            let density = &f64::buffers_checked(density_q)?.values;
            let energy = &f64::buffers_checked(energy_q)?.values;
            for i in range.clone() {
                let (p, cs) = self.eos.evaluate(density[i], energy[i]);
                pressure[i] = p;
                sound[i] = cs;
            }
        }
        if let Some(rheology) = &self.rheology {
            rheology.initialize(storage, range, &self.config)?;
        }
        Ok(())
    }

    /// Per-step update after the derivative loop: damage growth.
    pub fn finalize(&self, storage: &mut Storage, range: Range<usize>) -> ImpactResult<()> {
        if let Some(rheology) = &self.rheology {
            rheology.integrate(storage, range, &self.config)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use impact_math::Vector;

    #[test]
    fn test_ideal_gas_zero_energy() {
        let eos = IdealGasEos::new(1.4);
        let (p, cs) = eos.evaluate(1.0, 0.0);
        assert_eq!(p, 0.0);
        assert_eq!(cs, 0.0);
    }

    #[test]
    fn test_ideal_gas_sound_speed() {
        let eos = IdealGasEos::new(1.4);
        let (p, cs) = eos.evaluate(2.0, 10.0);
        assert!((p - 0.4 * 10.0 * 2.0).abs() < 1e-12);
        assert!((cs - (1.4 * p / 2.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_tillotson_reference_state() {
        // at the reference density with zero energy the pressure
        // vanishes and the sound speed stays positive
        let config = BodyConfig {
            eos: EosEnum::Tillotson,
            ..BodyConfig::default()
        };
        let eos = TillotsonEos::new(&config);
        let (p, cs) = eos.evaluate(config.density, 0.0);
        assert!(p.abs() < 1e-6 * config.tillotson.bulk_modulus);
        assert!(cs > 0.0);
    }

    #[test]
    fn test_tillotson_derivative_matches_finite_difference() {
        let config = BodyConfig {
            eos: EosEnum::Tillotson,
            ..BodyConfig::default()
        };
        let eos = TillotsonEos::new(&config);
        let rho = config.density;
        let (_, cs) = eos.evaluate(rho, 0.0);
        // at u = 0 and p = 0 the squared sound speed reduces to dp/drho
        let step = 1.0e-4 * rho;
        let p = |r: f64| eos.compressed(r, 0.0).0;
        let fd = (-p(rho + 2.0 * step) + 8.0 * p(rho + step) - 8.0 * p(rho - step)
            + p(rho - 2.0 * step))
            / (12.0 * step);
        assert!(
            ((cs * cs - fd) / fd).abs() < 1e-4,
            "cs^2 = {}, fd = {}",
            cs * cs,
            fd
        );
    }

    #[test]
    fn test_tillotson_compression_raises_pressure() {
        let config = BodyConfig {
            eos: EosEnum::Tillotson,
            ..BodyConfig::default()
        };
        let eos = TillotsonEos::new(&config);
        let (p_compressed, _) = eos.evaluate(1.2 * config.density, 0.0);
        let (p_reference, _) = eos.evaluate(config.density, 0.0);
        assert!(p_compressed > p_reference);
    }

    #[test]
    fn test_murnaghan_linear_in_density() {
        let eos = MurnaghanEos::new(1000.0, 1.0e9);
        let (p0, cs) = eos.evaluate(1000.0, 0.0);
        assert_eq!(p0, 0.0);
        let (p1, _) = eos.evaluate(1100.0, 5.0);
        assert!((p1 - cs * cs * 100.0).abs() < 1e-6);
    }

    fn strength_storage(n: usize, config: &BodyConfig) -> (Storage, Material) {
        let material = Material::from_config(config).unwrap();
        let mut storage = Storage::new();
        let positions: Vec<Vector> = (0..n)
            .map(|i| Vector::with_h(i as f64, 0.0, 0.0, 1.0))
            .collect();
        storage
            .insert(QuantityId::Position, OrderEnum::Second, positions)
            .unwrap();
        storage
            .insert_uniform(QuantityId::Mass, OrderEnum::Zero, config.density)
            .unwrap();
        let mut context = MaterialContext::new(1234, 0, 2.0);
        material.create(&mut storage, 0..n, &mut context).unwrap();
        (storage, material)
    }

    #[test]
    fn test_von_mises_reduces_large_stress() {
        let config = BodyConfig {
            eos: EosEnum::Tillotson,
            rheology: YieldingEnum::VonMises,
            damage: DamageEnum::None,
            ..BodyConfig::default()
        };
        let (mut storage, material) = strength_storage(4, &config);
        let limit = config.elasticity_limit;
        {
            let stress = storage
                .value_mut::<TracelessTensor>(QuantityId::DeviatoricStress)
                .unwrap();
            // far beyond the yield surface
            stress[0] = TracelessTensor::new(100.0 * limit, -50.0 * limit, 0.0, 0.0, 0.0);
            stress[1] = TracelessTensor::new(1.0e-6 * limit, 0.0, 0.0, 0.0, 0.0);
        }
        material.initialize(&mut storage, 0..4).unwrap();
        let stress = storage
            .value::<TracelessTensor>(QuantityId::DeviatoricStress)
            .unwrap();
        let reduce = storage.value::<f64>(QuantityId::StressReducing).unwrap();
        // large stress was returned to the yield surface
        let j2 = 0.5 * stress[0].ddot(&stress[0]);
        assert!((3.0 * j2).sqrt() <= 1.01 * limit);
        assert!(reduce[0] < 1.0);
        // small stress untouched
        assert!((reduce[1] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_drucker_prager_pressure_dependence() {
        let config = BodyConfig {
            eos: EosEnum::Tillotson,
            rheology: YieldingEnum::DruckerPrager,
            damage: DamageEnum::None,
            ..BodyConfig::default()
        };
        let (mut storage, material) = strength_storage(2, &config);
        {
            // compress the first particle so its pressure is positive
            let density = storage.value_mut::<f64>(QuantityId::Density).unwrap();
            density[0] = 1.05 * config.density;
            let stress = storage
                .value_mut::<TracelessTensor>(QuantityId::DeviatoricStress)
                .unwrap();
            let s = 10.0 * config.elasticity_limit;
            stress[0] = TracelessTensor::new(s, -0.5 * s, 0.0, 0.0, 0.0);
            stress[1] = TracelessTensor::new(s, -0.5 * s, 0.0, 0.0, 0.0);
        }
        material.initialize(&mut storage, 0..2).unwrap();
        let reduce = storage.value::<f64>(QuantityId::StressReducing).unwrap();
        // higher pressure means higher yield, thus weaker reduction
        assert!(reduce[0] > reduce[1]);
    }

    #[test]
    fn test_grady_kipp_flaw_assignment() {
        let config = BodyConfig {
            eos: EosEnum::Tillotson,
            rheology: YieldingEnum::VonMises,
            damage: DamageEnum::ScalarGradyKipp,
            ..BodyConfig::default()
        };
        let (storage, _material) = strength_storage(100, &config);
        let n_flaws = storage.value::<u64>(QuantityId::FlawCount).unwrap();
        let eps_min = storage.value::<f64>(QuantityId::EpsMin).unwrap();
        let m_zero = storage.value::<f64>(QuantityId::WeibullExponent).unwrap();
        assert!(n_flaws.iter().all(|&n| n >= 1));
        assert!(n_flaws.iter().sum::<u64>() >= 100);
        assert!(eps_min.iter().all(|&e| e > 0.0 && e.is_finite()));
        assert!(m_zero.iter().all(|&m| m > 0.0 && m.is_finite()));
    }

    #[test]
    fn test_damage_requires_rheology() {
        let config = BodyConfig {
            rheology: YieldingEnum::None,
            damage: DamageEnum::ScalarGradyKipp,
            ..BodyConfig::default()
        };
        assert!(matches!(
            Material::from_config(&config),
            Err(ImpactError::InvalidSetup(_))
        ));
    }

    #[test]
    fn test_damage_growth_under_tension() {
        let config = BodyConfig {
            eos: EosEnum::Tillotson,
            rheology: YieldingEnum::VonMises,
            damage: DamageEnum::ScalarGradyKipp,
            ..BodyConfig::default()
        };
        let (mut storage, material) = strength_storage(10, &config);
        material.initialize(&mut storage, 0..10).unwrap();
        {
            // strong tension activates flaws
            let pressure = storage.value_mut::<f64>(QuantityId::Pressure).unwrap();
            for p in pressure.iter_mut() {
                *p = -0.1 * config.tillotson.bulk_modulus;
            }
        }
        material.finalize(&mut storage, 0..10).unwrap();
        let ddamage = storage.dt::<f64>(QuantityId::Damage).unwrap();
        assert!(ddamage.iter().any(|&dd| dd > 0.0));
    }
}
