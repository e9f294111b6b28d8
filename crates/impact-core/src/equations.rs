// ─────────────────────────────────────────────────────────────────────
// SCPN Impact Core — Equation Terms
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Equation terms composing the SPH discretization: pressure gradient,
//! continuity, artificial viscosity, solid stress, XSPH, adaptive
//! smoothing length, and analytic external forces.
//!
//! Each term registers derivatives into the holder and may post-process
//! the reduced buffers in `finalize`, which runs after the pair loop in
//! registration order.

use crate::derivatives::{
    Accumulated, BufferSource, Derivative, DerivativeHolder, DerivativeInput, Phase,
};
use crate::storage::{OrderEnum, QuantityId, Storage};
use impact_math::affine::AffineMatrix;
use impact_math::kernel::{Kernel, LutKernel};
use impact_math::tensor::{SymmetricTensor, TracelessTensor};
use impact_math::vector::{cross, dot, Vector};
use impact_types::error::ImpactResult;

/// One term of the evolution equations.
pub trait EquationTerm: Send + Sync {
    fn set_derivatives(&self, holder: &mut DerivativeHolder) -> ImpactResult<()>;

    /// Insert the quantities the term evolves; called once at setup.
    fn create(&self, _storage: &mut Storage) -> ImpactResult<()> {
        Ok(())
    }

    /// Called before the derivative loop of each step.
    fn initialize(&self, _storage: &mut Storage) -> ImpactResult<()> {
        Ok(())
    }

    /// Called between the precomputation and evaluation phases.
    fn after_precomputation(&self, _storage: &mut Storage) -> ImpactResult<()> {
        Ok(())
    }

    /// Called after the reduced buffers are stored.
    fn finalize(&self, _storage: &mut Storage) -> ImpactResult<()> {
        Ok(())
    }

    /// Terms that act as a gravity solver; at most one per run.
    fn is_gravity(&self) -> bool {
        false
    }
}

// ── pressure force ───────────────────────────────────────────────────

struct PressureGradient;

impl Derivative for PressureGradient {
    fn create(&self, results: &mut Accumulated) -> ImpactResult<()> {
        results.insert_vector(QuantityId::Position, Phase::Evaluation, BufferSource::Shared)?;
        results.insert_scalar(QuantityId::Energy, Phase::Evaluation, BufferSource::Shared)
    }

    fn eval(
        &self,
        i: usize,
        neighbours: &[usize],
        grads: &[Vector],
        input: &DerivativeInput<'_>,
        results: &mut Accumulated,
        symmetric: bool,
    ) {
        debug_assert!(neighbours.len() == grads.len());
        let p_rho_i = input.p[i] / (input.rho[i] * input.rho[i]);
        {
            let dv = results.vector_mut(QuantityId::Position);
            for (&j, &grad) in neighbours.iter().zip(grads) {
                let p_rho_j = input.p[j] / (input.rho[j] * input.rho[j]);
                let force = grad * (p_rho_i + p_rho_j);
                dv[i] -= force * input.m[j];
                if symmetric {
                    dv[j] += force * input.m[i];
                }
            }
        }
        let du = results.scalar_mut(QuantityId::Energy);
        for (&j, &grad) in neighbours.iter().zip(grads) {
            let heating = dot(input.v[i] - input.v[j], grad);
            du[i] += p_rho_i * input.m[j] * heating;
            if symmetric {
                let p_rho_j = input.p[j] / (input.rho[j] * input.rho[j]);
                du[j] += p_rho_j * input.m[i] * heating;
            }
        }
    }
}

/// Momentum and shock-heating contribution of the pressure gradient.
pub struct PressureForce;

impl EquationTerm for PressureForce {
    fn set_derivatives(&self, holder: &mut DerivativeHolder) -> ImpactResult<()> {
        holder.require(Box::new(PressureGradient))
    }
}

// ── continuity ───────────────────────────────────────────────────────

struct VelocityDivergenceDerivative;

impl Derivative for VelocityDivergenceDerivative {
    fn create(&self, results: &mut Accumulated) -> ImpactResult<()> {
        results.insert_scalar(
            QuantityId::VelocityDivergence,
            Phase::Evaluation,
            BufferSource::Shared,
        )
    }

    fn eval(
        &self,
        i: usize,
        neighbours: &[usize],
        grads: &[Vector],
        input: &DerivativeInput<'_>,
        results: &mut Accumulated,
        symmetric: bool,
    ) {
        let divv = results.scalar_mut(QuantityId::VelocityDivergence);
        for (&j, &grad) in neighbours.iter().zip(grads) {
            let contribution = dot(input.v[j] - input.v[i], grad);
            divv[i] += input.m[j] / input.rho[j] * contribution;
            if symmetric {
                // both the relative velocity and the gradient flip sign
                divv[j] += input.m[i] / input.rho[i] * contribution;
            }
        }
    }
}

/// Density evolution drho/dt = -rho div v; with strength, the trace of
/// the filtered velocity gradient replaces the plain divergence.
pub struct ContinuityEquation {
    solid: bool,
}

impl ContinuityEquation {
    pub fn new(solid: bool) -> Self {
        ContinuityEquation { solid }
    }
}

impl EquationTerm for ContinuityEquation {
    fn set_derivatives(&self, holder: &mut DerivativeHolder) -> ImpactResult<()> {
        holder.require(Box::new(VelocityDivergenceDerivative))?;
        if self.solid {
            holder.require(Box::new(StrengthVelocityGradient))?;
        }
        Ok(())
    }

    fn create(&self, storage: &mut Storage) -> ImpactResult<()> {
        storage.insert_uniform(QuantityId::VelocityDivergence, OrderEnum::Zero, 0.0_f64)?;
        if self.solid {
            create_gradient_quantities(storage)?;
        }
        Ok(())
    }

    fn finalize(&self, storage: &mut Storage) -> ImpactResult<()> {
        let divv: Vec<f64> = storage.value::<f64>(QuantityId::VelocityDivergence)?.to_vec();
        let gradient: Option<Vec<SymmetricTensor>> = if self.solid {
            Some(
                storage
                    .value::<SymmetricTensor>(QuantityId::VelocityGradient)?
                    .to_vec(),
            )
        } else {
            None
        };
        let reduce: Option<Vec<f64>> = if self.solid {
            Some(storage.value::<f64>(QuantityId::StressReducing)?.to_vec())
        } else {
            None
        };
        let rho_values: Vec<f64> = storage.value::<f64>(QuantityId::Density)?.to_vec();
        let drho = storage.dt_mut::<f64>(QuantityId::Density)?;
        for i in 0..drho.len() {
            let divergence = match (&gradient, &reduce) {
                (Some(gradient), Some(reduce)) if reduce[i] > 0.0 => gradient[i].trace(),
                _ => divv[i],
            };
            drho[i] = -rho_values[i] * divergence;
        }
        Ok(())
    }
}

fn create_gradient_quantities(storage: &mut Storage) -> ImpactResult<()> {
    if !storage.has(QuantityId::VelocityGradient) {
        storage.insert_uniform(
            QuantityId::VelocityGradient,
            OrderEnum::Zero,
            SymmetricTensor::null(),
        )?;
        storage.insert_uniform(QuantityId::VelocityRotation, OrderEnum::Zero, Vector::zero())?;
    }
    Ok(())
}

// ── adaptive smoothing length ────────────────────────────────────────

/// dh/dt = h / (d rho) drho/dt with d = 3; written into the H lane of
/// the velocity so that h integrates as an ordinary component.
pub struct AdaptiveSmoothingLength;

impl EquationTerm for AdaptiveSmoothingLength {
    fn set_derivatives(&self, _holder: &mut DerivativeHolder) -> ImpactResult<()> {
        Ok(())
    }

    fn finalize(&self, storage: &mut Storage) -> ImpactResult<()> {
        let drho: Vec<f64> = storage.dt::<f64>(QuantityId::Density)?.to_vec();
        let rho: Vec<f64> = storage.value::<f64>(QuantityId::Density)?.to_vec();
        let (positions, velocities, _) =
            storage.all_buffers_mut::<Vector>(QuantityId::Position)?;
        for i in 0..positions.len() {
            let dh = positions[i].h() / (3.0 * rho[i]) * drho[i];
            velocities[i].set_h(dh);
        }
        Ok(())
    }
}

// ── artificial viscosity ─────────────────────────────────────────────

struct MonaghanAvDerivative {
    alpha: f64,
    beta: f64,
}

impl MonaghanAvDerivative {
    const EPS: f64 = 1.0e-2;
}

impl Derivative for MonaghanAvDerivative {
    fn create(&self, results: &mut Accumulated) -> ImpactResult<()> {
        results.insert_vector(QuantityId::Position, Phase::Evaluation, BufferSource::Shared)?;
        results.insert_scalar(QuantityId::Energy, Phase::Evaluation, BufferSource::Shared)
    }

    fn eval(
        &self,
        i: usize,
        neighbours: &[usize],
        grads: &[Vector],
        input: &DerivativeInput<'_>,
        results: &mut Accumulated,
        symmetric: bool,
    ) {
        for (&j, &grad) in neighbours.iter().zip(grads) {
            let dv = input.v[i] - input.v[j];
            let dr = input.r[i] - input.r[j];
            let dvdr = dot(dv, dr);
            if dvdr >= 0.0 {
                continue; // only converging pairs dissipate
            }
            let h_bar = 0.5 * (input.r[i].h() + input.r[j].h());
            let rho_bar = 0.5 * (input.rho[i] + input.rho[j]);
            let cs_bar = 0.5 * (input.cs[i] + input.cs[j]);
            let mu = h_bar * dvdr
                / (impact_math::vector::sqr_length(dr) + Self::EPS * h_bar * h_bar);
            let pi_ij = (-self.alpha * cs_bar * mu + self.beta * mu * mu) / rho_bar;

            let force = grad * pi_ij;
            let heating = 0.5 * pi_ij * dot(dv, grad);
            {
                let acc = results.vector_mut(QuantityId::Position);
                acc[i] -= force * input.m[j];
                if symmetric {
                    acc[j] += force * input.m[i];
                }
            }
            let du = results.scalar_mut(QuantityId::Energy);
            du[i] += input.m[j] * heating;
            if symmetric {
                du[j] += input.m[i] * heating;
            }
        }
    }
}

/// Standard Monaghan artificial viscosity controlled by (alpha, beta).
pub struct StandardAV {
    alpha: f64,
    beta: f64,
}

impl StandardAV {
    pub fn new(alpha: f64, beta: f64) -> Self {
        StandardAV { alpha, beta }
    }
}

impl EquationTerm for StandardAV {
    fn set_derivatives(&self, holder: &mut DerivativeHolder) -> ImpactResult<()> {
        holder.require(Box::new(MonaghanAvDerivative {
            alpha: self.alpha,
            beta: self.beta,
        }))
    }
}

// ── solid stress ─────────────────────────────────────────────────────

/// Filtered velocity gradient and rotation accumulated only over pairs
/// of the same body with nonzero stress reduction, optionally corrected
/// by the angular-momentum correction tensor.
struct StrengthVelocityGradient;

impl Derivative for StrengthVelocityGradient {
    fn create(&self, results: &mut Accumulated) -> ImpactResult<()> {
        results.insert_symmetric_tensor(
            QuantityId::VelocityGradient,
            Phase::Evaluation,
            BufferSource::Shared,
        )?;
        results.insert_vector(
            QuantityId::VelocityRotation,
            Phase::Evaluation,
            BufferSource::Shared,
        )
    }

    fn eval(
        &self,
        i: usize,
        neighbours: &[usize],
        grads: &[Vector],
        input: &DerivativeInput<'_>,
        results: &mut Accumulated,
        symmetric: bool,
    ) {
        let reduce = input.reduce;
        for (&j, &grad) in neighbours.iter().zip(grads) {
            if !input.same_body(i, j) {
                continue;
            }
            if let Some(reduce) = reduce {
                if reduce[i] == 0.0 || reduce[j] == 0.0 {
                    continue;
                }
            }
            let dv = input.v[j] - input.v[i];
            let grad_i = match input.correction {
                Some(correction) => correction[i] * grad,
                None => grad,
            };
            {
                let gradient = results.symmetric_tensor_mut(QuantityId::VelocityGradient);
                gradient[i] += SymmetricTensor::symmetric_outer(dv, grad_i)
                    * (input.m[j] / input.rho[j]);
            }
            {
                let rotation = results.vector_mut(QuantityId::VelocityRotation);
                rotation[i] += cross(dv, grad_i) * (input.m[j] / input.rho[j]);
            }
            if symmetric {
                let grad_j = match input.correction {
                    Some(correction) => correction[j] * grad,
                    None => grad,
                };
                let gradient = results.symmetric_tensor_mut(QuantityId::VelocityGradient);
                gradient[j] += SymmetricTensor::symmetric_outer(dv, grad_j)
                    * (input.m[i] / input.rho[i]);
                let rotation = results.vector_mut(QuantityId::VelocityRotation);
                rotation[j] += cross(dv, grad_j) * (input.m[i] / input.rho[i]);
            }
        }
    }
}

struct StressDivergence;

impl Derivative for StressDivergence {
    fn create(&self, results: &mut Accumulated) -> ImpactResult<()> {
        results.insert_vector(QuantityId::Position, Phase::Evaluation, BufferSource::Shared)
    }

    fn eval(
        &self,
        i: usize,
        neighbours: &[usize],
        grads: &[Vector],
        input: &DerivativeInput<'_>,
        results: &mut Accumulated,
        symmetric: bool,
    ) {
        let stress = match input.stress {
            Some(stress) => stress,
            None => return,
        };
        let acc = results.vector_mut(QuantityId::Position);
        let s_i = stress[i] * (input.damage_reduction(i) / (input.rho[i] * input.rho[i]));
        for (&j, &grad) in neighbours.iter().zip(grads) {
            if !input.same_body(i, j) {
                continue; // no stress interaction across bodies
            }
            let s_j = stress[j] * (input.damage_reduction(j) / (input.rho[j] * input.rho[j]));
            let force = (s_i + s_j) * grad;
            acc[i] += force * input.m[j];
            if symmetric {
                acc[j] -= force * input.m[i];
            }
        }
    }
}

/// Deviatoric stress in the momentum equation plus the Hooke's-law
/// stress rate with Jaumann rotation terms.
pub struct SolidStressForce {
    shear_modulus: f64,
}

impl SolidStressForce {
    pub fn new(shear_modulus: f64) -> Self {
        SolidStressForce { shear_modulus }
    }
}

impl EquationTerm for SolidStressForce {
    fn set_derivatives(&self, holder: &mut DerivativeHolder) -> ImpactResult<()> {
        holder.require(Box::new(StressDivergence))?;
        holder.require(Box::new(StrengthVelocityGradient))
    }

    fn create(&self, storage: &mut Storage) -> ImpactResult<()> {
        create_gradient_quantities(storage)
    }

    fn finalize(&self, storage: &mut Storage) -> ImpactResult<()> {
        let gradient: Vec<SymmetricTensor> = storage
            .value::<SymmetricTensor>(QuantityId::VelocityGradient)?
            .to_vec();
        let rotation: Vec<Vector> = storage
            .value::<Vector>(QuantityId::VelocityRotation)?
            .to_vec();
        let rho: Vec<f64> = storage.value::<f64>(QuantityId::Density)?.to_vec();
        let damage: Option<Vec<f64>> = storage
            .try_quantity(QuantityId::Damage)
            .map(|_| storage.value::<f64>(QuantityId::Damage).map(|d| d.to_vec()))
            .transpose()?;

        // stress power heats the material
        {
            let stress: Vec<TracelessTensor> = storage
                .value::<TracelessTensor>(QuantityId::DeviatoricStress)?
                .to_vec();
            let du = storage.dt_mut::<f64>(QuantityId::Energy)?;
            for i in 0..du.len() {
                let reduction = damage
                    .as_ref()
                    .map(|d| 1.0 - d[i].powi(3))
                    .unwrap_or(1.0);
                let damaged = stress[i] * reduction;
                du[i] += damaged.to_symmetric().ddot(&gradient[i]) / rho[i];
            }
        }

        let mu = self.shear_modulus;
        let (stress, dstress, _) =
            storage.all_buffers_mut::<TracelessTensor>(QuantityId::DeviatoricStress)?;
        for i in 0..stress.len() {
            let strain_rate = gradient[i];
            let hooke = TracelessTensor::from_symmetric(&strain_rate) * (2.0 * mu);
            // Jaumann terms keep the rate objective under rigid rotation
            let spin = AffineMatrix::cross_product_operator(rotation[i] * -0.5);
            let s_matrix = AffineMatrix::from_symmetric(&stress[i].to_symmetric());
            let jaumann = spin * s_matrix - s_matrix * spin;
            dstress[i] = hooke + TracelessTensor::from_symmetric(&jaumann.symmetrize());
        }
        Ok(())
    }
}

// ── angular momentum correction ──────────────────────────────────────

/// Precomputation-phase correction tensor C_ij = sum m/rho (r_j - r_i)
/// (x) grad W; its inverse multiplies kernel gradients in the strength
/// velocity gradient, restoring angular momentum conservation for
/// solid bodies (Schafer et al. 2007).
struct CorrectionTensorDerivative;

impl Derivative for CorrectionTensorDerivative {
    fn phase(&self) -> Phase {
        Phase::Precomputation
    }

    fn create(&self, results: &mut Accumulated) -> ImpactResult<()> {
        results.insert_symmetric_tensor(
            QuantityId::AngularMomentumCorrection,
            Phase::Precomputation,
            BufferSource::Unique,
        )
    }

    fn eval(
        &self,
        i: usize,
        neighbours: &[usize],
        grads: &[Vector],
        input: &DerivativeInput<'_>,
        results: &mut Accumulated,
        symmetric: bool,
    ) {
        let correction = results.symmetric_tensor_mut(QuantityId::AngularMomentumCorrection);
        for (&j, &grad) in neighbours.iter().zip(grads) {
            let tensor = SymmetricTensor::symmetric_outer(input.r[j] - input.r[i], grad);
            correction[i] += tensor * (input.m[j] / input.rho[j]);
            if symmetric {
                correction[j] += tensor * (input.m[i] / input.rho[i]);
            }
        }
    }
}

pub struct AngularMomentumCorrection;

impl EquationTerm for AngularMomentumCorrection {
    fn set_derivatives(&self, holder: &mut DerivativeHolder) -> ImpactResult<()> {
        holder.require(Box::new(CorrectionTensorDerivative))
    }

    fn create(&self, storage: &mut Storage) -> ImpactResult<()> {
        storage.insert_uniform(
            QuantityId::AngularMomentumCorrection,
            OrderEnum::Zero,
            SymmetricTensor::identity(),
        )
    }

    fn after_precomputation(&self, storage: &mut Storage) -> ImpactResult<()> {
        let correction =
            storage.value_mut::<SymmetricTensor>(QuantityId::AngularMomentumCorrection)?;
        for tensor in correction.iter_mut() {
            // isolated particles have a singular correction; fall back
            // to the identity
            *tensor = if tensor.determinant().abs() > 1.0e-12 {
                tensor.inverse()
            } else {
                SymmetricTensor::identity()
            };
        }
        Ok(())
    }
}

// ── XSPH ─────────────────────────────────────────────────────────────

struct XsphDerivative {
    epsilon: f64,
    kernel: LutKernel,
}

impl Derivative for XsphDerivative {
    fn create(&self, results: &mut Accumulated) -> ImpactResult<()> {
        results.insert_vector(QuantityId::XsphVelocity, Phase::Evaluation, BufferSource::Unique)
    }

    fn eval(
        &self,
        i: usize,
        neighbours: &[usize],
        grads: &[Vector],
        input: &DerivativeInput<'_>,
        results: &mut Accumulated,
        symmetric: bool,
    ) {
        debug_assert!(neighbours.len() == grads.len());
        let correction = results.vector_mut(QuantityId::XsphVelocity);
        for &j in neighbours {
            let weight = self.kernel.value(
                input.r[i] - input.r[j],
                0.5 * (input.r[i].h() + input.r[j].h()),
            );
            let dv = input.v[j] - input.v[i];
            // geometric lanes only; dh/dt is not smoothed
            let dv = Vector::new(dv[0], dv[1], dv[2]);
            let rho_bar = 0.5 * (input.rho[i] + input.rho[j]);
            correction[i] += dv * (self.epsilon * input.m[j] / rho_bar * weight);
            if symmetric {
                correction[j] -= dv * (self.epsilon * input.m[i] / rho_bar * weight);
            }
        }
    }
}

/// Smoothed velocity correction applied only to the positional time
/// derivative.
pub struct XsphTerm {
    epsilon: f64,
}

impl XsphTerm {
    pub fn new(epsilon: f64) -> Self {
        XsphTerm { epsilon }
    }
}

impl EquationTerm for XsphTerm {
    fn set_derivatives(&self, holder: &mut DerivativeHolder) -> ImpactResult<()> {
        holder.require(Box::new(XsphDerivative {
            epsilon: self.epsilon,
            kernel: LutKernel::default(),
        }))
    }

    fn create(&self, storage: &mut Storage) -> ImpactResult<()> {
        storage.insert_uniform(QuantityId::XsphVelocity, OrderEnum::Zero, Vector::zero())
    }
}

// ── external forces ──────────────────────────────────────────────────

pub struct ConstantAcceleration {
    acceleration: Vector,
}

impl ConstantAcceleration {
    pub fn new(acceleration: Vector) -> Self {
        ConstantAcceleration { acceleration }
    }
}

impl EquationTerm for ConstantAcceleration {
    fn set_derivatives(&self, _holder: &mut DerivativeHolder) -> ImpactResult<()> {
        Ok(())
    }

    fn finalize(&self, storage: &mut Storage) -> ImpactResult<()> {
        let acceleration = storage.d2t_mut::<Vector>(QuantityId::Position)?;
        for a in acceleration.iter_mut() {
            *a += self.acceleration;
        }
        Ok(())
    }
}

/// Coriolis and centrifugal acceleration of a frame rotating with
/// angular frequency omega.
pub struct InertialForce {
    omega: Vector,
}

impl InertialForce {
    pub fn new(omega: Vector) -> Self {
        InertialForce { omega }
    }
}

impl EquationTerm for InertialForce {
    fn set_derivatives(&self, _holder: &mut DerivativeHolder) -> ImpactResult<()> {
        Ok(())
    }

    fn finalize(&self, storage: &mut Storage) -> ImpactResult<()> {
        let velocities: Vec<Vector> = storage.dt::<Vector>(QuantityId::Position)?.to_vec();
        let positions: Vec<Vector> = storage.value::<Vector>(QuantityId::Position)?.to_vec();
        let acceleration = storage.d2t_mut::<Vector>(QuantityId::Position)?;
        for i in 0..acceleration.len() {
            acceleration[i] -= cross(self.omega, velocities[i]) * 2.0
                + cross(self.omega, cross(self.omega, positions[i]));
        }
        Ok(())
    }
}

/// Analytic self-gravity of a homogeneous sphere, a cheap stand-in for
/// the tree solver during early fragmentation phases.
pub struct SphericalGravity {
    gravity_constant: f64,
    rho0: f64,
    center: Vector,
}

impl SphericalGravity {
    pub fn new(gravity_constant: f64, rho0: f64, center: Vector) -> Self {
        SphericalGravity {
            gravity_constant,
            rho0,
            center,
        }
    }
}

impl EquationTerm for SphericalGravity {
    fn set_derivatives(&self, _holder: &mut DerivativeHolder) -> ImpactResult<()> {
        Ok(())
    }

    fn finalize(&self, storage: &mut Storage) -> ImpactResult<()> {
        let factor = -4.0 / 3.0 * std::f64::consts::PI * self.gravity_constant * self.rho0;
        let positions: Vec<Vector> = storage.value::<Vector>(QuantityId::Position)?.to_vec();
        let acceleration = storage.d2t_mut::<Vector>(QuantityId::Position)?;
        for i in 0..acceleration.len() {
            let dr = positions[i] - self.center;
            acceleration[i] += Vector::new(dr[0], dr[1], dr[2]) * factor;
        }
        Ok(())
    }

    fn is_gravity(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair_input<'a>(
        r: &'a [Vector],
        v: &'a [Vector],
        m: &'a [f64],
        rho: &'a [f64],
        p: &'a [f64],
        cs: &'a [f64],
        flag: &'a [u64],
    ) -> DerivativeInput<'a> {
        DerivativeInput {
            r,
            v,
            m,
            rho,
            p,
            u: &[],
            cs,
            flag: Some(flag),
            stress: None,
            damage: None,
            reduce: None,
            correction: None,
        }
    }

    fn make_accumulated(derivative: &dyn Derivative, n: usize) -> Accumulated {
        let mut accumulated = Accumulated::default();
        derivative.create(&mut accumulated).unwrap();
        accumulated.initialize(n);
        accumulated
    }

    #[test]
    fn test_pressure_force_conserves_momentum() {
        let r = vec![
            Vector::with_h(0.0, 0.0, 0.0, 1.0),
            Vector::with_h(0.8, 0.3, 0.0, 1.0),
        ];
        let v = vec![Vector::zero(), Vector::new(-0.2, 0.1, 0.0)];
        let m = vec![2.0, 3.0];
        let rho = vec![1.0, 1.2];
        let p = vec![2.5, 1.5];
        let cs = vec![1.0, 1.0];
        let flag = vec![0, 0];
        let input = pair_input(&r, &v, &m, &rho, &p, &cs, &flag);

        let derivative = PressureGradient;
        let mut accumulated = make_accumulated(&derivative, 2);
        let kernel = LutKernel::default();
        let grads = vec![kernel.grad(r[0] - r[1], 1.0)];
        derivative.eval(0, &[1], &grads, &input, &mut accumulated, true);

        let dv = accumulated.vector_mut(QuantityId::Position);
        let total = dv[0] * m[0] + dv[1] * m[1];
        assert!(impact_math::vector::length(total) < 1e-12);
        // pressure pushes the particles apart
        assert!(dot(dv[0], r[0] - r[1]) > 0.0);
    }

    #[test]
    fn test_zero_pressure_produces_no_force() {
        let r = vec![
            Vector::with_h(0.0, 0.0, 0.0, 1.0),
            Vector::with_h(0.5, 0.0, 0.0, 1.0),
        ];
        let v = vec![Vector::zero(), Vector::zero()];
        let m = vec![1.0, 1.0];
        let rho = vec![1.0, 1.0];
        let p = vec![0.0, 0.0];
        let cs = vec![0.0, 0.0];
        let flag = vec![0, 0];
        let input = pair_input(&r, &v, &m, &rho, &p, &cs, &flag);

        let derivative = PressureGradient;
        let mut accumulated = make_accumulated(&derivative, 2);
        let kernel = LutKernel::default();
        let grads = vec![kernel.grad(r[0] - r[1], 1.0)];
        derivative.eval(0, &[1], &grads, &input, &mut accumulated, true);
        let dv = accumulated.vector_mut(QuantityId::Position);
        assert_eq!(dv[0], Vector::zero());
        assert_eq!(dv[1], Vector::zero());
    }

    #[test]
    fn test_av_active_only_for_converging_pairs() {
        let r = vec![
            Vector::with_h(0.0, 0.0, 0.0, 1.0),
            Vector::with_h(0.5, 0.0, 0.0, 1.0),
        ];
        let m = vec![1.0, 1.0];
        let rho = vec![1.0, 1.0];
        let p = vec![0.0, 0.0];
        let cs = vec![1.0, 1.0];
        let flag = vec![0, 0];
        let kernel = LutKernel::default();
        let grads = vec![kernel.grad(r[0] - r[1], 1.0)];
        let derivative = MonaghanAvDerivative {
            alpha: 1.5,
            beta: 3.0,
        };

        // receding pair: no dissipation
        let v_receding = vec![Vector::new(-1.0, 0.0, 0.0), Vector::new(1.0, 0.0, 0.0)];
        let input = pair_input(&r, &v_receding, &m, &rho, &p, &cs, &flag);
        let mut accumulated = make_accumulated(&derivative, 2);
        derivative.eval(0, &[1], &grads, &input, &mut accumulated, true);
        assert_eq!(accumulated.scalar_mut(QuantityId::Energy)[0], 0.0);

        // converging pair: positive heating on both sides
        let v_converging = vec![Vector::new(1.0, 0.0, 0.0), Vector::new(-1.0, 0.0, 0.0)];
        let input = pair_input(&r, &v_converging, &m, &rho, &p, &cs, &flag);
        let mut accumulated = make_accumulated(&derivative, 2);
        derivative.eval(0, &[1], &grads, &input, &mut accumulated, true);
        let du = accumulated.scalar_mut(QuantityId::Energy);
        assert!(du[0] > 0.0);
        assert!(du[1] > 0.0);
        // and decelerates the approach
        let dv = accumulated.vector_mut(QuantityId::Position);
        assert!(dv[0][0] < 0.0);
        assert!(dv[1][0] > 0.0);
    }

    #[test]
    fn test_strength_gradient_skips_other_bodies() {
        let r = vec![
            Vector::with_h(0.0, 0.0, 0.0, 1.0),
            Vector::with_h(0.5, 0.0, 0.0, 1.0),
        ];
        let v = vec![Vector::zero(), Vector::new(1.0, 0.0, 0.0)];
        let m = vec![1.0, 1.0];
        let rho = vec![1.0, 1.0];
        let p = vec![0.0, 0.0];
        let cs = vec![1.0, 1.0];
        let flag = vec![0, 1]; // different bodies
        let input = pair_input(&r, &v, &m, &rho, &p, &cs, &flag);

        let derivative = StrengthVelocityGradient;
        let mut accumulated = make_accumulated(&derivative, 2);
        let kernel = LutKernel::default();
        let grads = vec![kernel.grad(r[0] - r[1], 1.0)];
        derivative.eval(0, &[1], &grads, &input, &mut accumulated, true);
        let gradient = accumulated.symmetric_tensor_mut(QuantityId::VelocityGradient);
        assert_eq!(gradient[0], SymmetricTensor::null());
    }

    #[test]
    fn test_velocity_divergence_sign() {
        // uniform expansion v = r has div v = 3
        let r = vec![
            Vector::with_h(0.0, 0.0, 0.0, 1.0),
            Vector::with_h(0.5, 0.1, -0.2, 1.0),
        ];
        let v: Vec<Vector> = r
            .iter()
            .map(|ri| Vector::new(ri[0], ri[1], ri[2]))
            .collect();
        let m = vec![1.0, 1.0];
        let rho = vec![1.0, 1.0];
        let p = vec![0.0, 0.0];
        let cs = vec![1.0, 1.0];
        let flag = vec![0, 0];
        let input = pair_input(&r, &v, &m, &rho, &p, &cs, &flag);

        let derivative = VelocityDivergenceDerivative;
        let mut accumulated = make_accumulated(&derivative, 2);
        let kernel = LutKernel::default();
        let grads = vec![kernel.grad(r[0] - r[1], 1.0)];
        derivative.eval(0, &[1], &grads, &input, &mut accumulated, true);
        let divv = accumulated.scalar_mut(QuantityId::VelocityDivergence);
        // expansion: positive divergence estimate on both particles
        assert!(divv[0] > 0.0);
        assert!(divv[1] > 0.0);
    }

    #[test]
    fn test_inertial_force_centrifugal_direction() {
        let mut storage = Storage::new();
        storage
            .insert(
                QuantityId::Position,
                OrderEnum::Second,
                vec![Vector::with_h(1.0, 0.0, 0.0, 0.1)],
            )
            .unwrap();
        let term = InertialForce::new(Vector::new(0.0, 0.0, 2.0));
        term.finalize(&mut storage).unwrap();
        let acceleration = storage.d2t::<Vector>(QuantityId::Position).unwrap();
        // centrifugal acceleration points outward: -w x (w x r) = +w^2 r
        assert!((acceleration[0][0] - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_spherical_gravity_restoring() {
        let mut storage = Storage::new();
        storage
            .insert(
                QuantityId::Position,
                OrderEnum::Second,
                vec![Vector::with_h(0.5, 0.0, 0.0, 0.1)],
            )
            .unwrap();
        let term = SphericalGravity::new(1.0, 1.0, Vector::zero());
        term.finalize(&mut storage).unwrap();
        let acceleration = storage.d2t::<Vector>(QuantityId::Position).unwrap();
        assert!(acceleration[0][0] < 0.0);
        let expected = -4.0 / 3.0 * std::f64::consts::PI * 0.5;
        assert!((acceleration[0][0] - expected).abs() < 1e-12);
    }
}
