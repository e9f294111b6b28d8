//! SPH smoothing kernels.
//!
//! A kernel implementation provides the dimensionless profile w(q^2) and
//! its derivative divided by q, both as functions of the SQUARED
//! dimensionless distance; the generic `value`/`grad` wrappers apply the
//! h scaling. The solver uses a look-up-table approximation of the
//! analytic kernel to keep transcendentals out of the pair loop, and a
//! symmetrized evaluator with h = (h_i + h_j) / 2 whose gradient is
//! antisymmetric in the pair.

use crate::vector::{sqr_length, Vector};
use ndarray::Array1;

pub trait Kernel {
    /// Support radius in units of h.
    fn radius(&self) -> f64;

    /// Kernel profile as a function of q^2.
    fn value_impl(&self, q_sqr: f64) -> f64;

    /// Profile derivative divided by q, as a function of q^2.
    fn grad_impl(&self, q_sqr: f64) -> f64;

    fn value(&self, r: Vector, h: f64) -> f64 {
        debug_assert!(h > 0.0);
        self.value_impl(sqr_length(r) / (h * h)) / (h * h * h)
    }

    /// Kernel gradient; a purely geometric vector, the smoothing-length
    /// lane of `r` does not leak into it.
    fn grad(&self, r: Vector, h: f64) -> Vector {
        debug_assert!(h > 0.0);
        let scale = self.grad_impl(sqr_length(r) / (h * h)) / (h * h * h * h * h);
        Vector::new(r[0] * scale, r[1] * scale, r[2] * scale)
    }
}

/// The M4 cubic spline with support radius 2.
#[derive(Debug, Clone, Copy, Default)]
pub struct CubicSpline;

impl CubicSpline {
    const NORMALIZATION: f64 = 1.0 / std::f64::consts::PI;
}

impl Kernel for CubicSpline {
    fn radius(&self) -> f64 {
        2.0
    }

    fn value_impl(&self, q_sqr: f64) -> f64 {
        let q = q_sqr.sqrt();
        if q < 1.0 {
            Self::NORMALIZATION * (0.25 * (2.0 - q).powi(3) - (1.0 - q).powi(3))
        } else if q < 2.0 {
            Self::NORMALIZATION * 0.25 * (2.0 - q).powi(3)
        } else {
            0.0
        }
    }

    fn grad_impl(&self, q_sqr: f64) -> f64 {
        let q = q_sqr.sqrt();
        if q == 0.0 {
            // the limit of w'(q)/q for the cubic spline
            return -3.0 * Self::NORMALIZATION;
        }
        if q < 1.0 {
            Self::NORMALIZATION * (-0.75 * (2.0 - q).powi(2) + 3.0 * (1.0 - q).powi(2)) / q
        } else if q < 2.0 {
            Self::NORMALIZATION * (-0.75 * (2.0 - q).powi(2)) / q
        } else {
            0.0
        }
    }
}

/// Look-up-table approximation of a kernel, linearly interpolated over a
/// uniform grid in q^2.
#[derive(Debug, Clone)]
pub struct LutKernel {
    values: Array1<f64>,
    grads: Array1<f64>,
    radius: f64,
    radius_inv_sqr: f64,
}

impl LutKernel {
    const ENTRIES: usize = 40000;

    pub fn new<K: Kernel>(source: &K) -> Self {
        let radius = source.radius();
        debug_assert!(radius > 0.0);
        let radius_sqr = radius * radius;
        let step = radius_sqr / Self::ENTRIES as f64;
        let values = Array1::from_shape_fn(Self::ENTRIES, |i| source.value_impl(i as f64 * step));
        let grads = Array1::from_shape_fn(Self::ENTRIES, |i| source.grad_impl(i as f64 * step));
        LutKernel {
            values,
            grads,
            radius,
            radius_inv_sqr: 1.0 / radius_sqr,
        }
    }

    fn interpolate(&self, table: &Array1<f64>, q_sqr: f64) -> f64 {
        debug_assert!(q_sqr >= 0.0);
        let float_idx = Self::ENTRIES as f64 * q_sqr * self.radius_inv_sqr;
        let idx = float_idx as usize;
        if idx >= Self::ENTRIES {
            return 0.0;
        }
        let ratio = float_idx - idx as f64;
        let next = if idx + 1 < Self::ENTRIES {
            table[idx + 1]
        } else {
            0.0
        };
        table[idx] * (1.0 - ratio) + next * ratio
    }
}

impl Kernel for LutKernel {
    fn radius(&self) -> f64 {
        self.radius
    }

    fn value_impl(&self, q_sqr: f64) -> f64 {
        self.interpolate(&self.values, q_sqr)
    }

    fn grad_impl(&self, q_sqr: f64) -> f64 {
        self.interpolate(&self.grads, q_sqr)
    }
}

impl Default for LutKernel {
    fn default() -> Self {
        LutKernel::new(&CubicSpline)
    }
}

/// Pair evaluator symmetrizing the smoothing length, h = (h_i + h_j)/2.
/// The gradient is antisymmetric under swapping the pair.
#[derive(Debug, Clone, Copy)]
pub struct SymmetrizedKernel<'a> {
    kernel: &'a LutKernel,
}

impl<'a> SymmetrizedKernel<'a> {
    pub fn new(kernel: &'a LutKernel) -> Self {
        SymmetrizedKernel { kernel }
    }

    pub fn radius(&self) -> f64 {
        self.kernel.radius()
    }

    pub fn value(&self, r1: Vector, r2: Vector) -> f64 {
        self.kernel.value(r1 - r2, 0.5 * (r1.h() + r2.h()))
    }

    pub fn grad(&self, r1: Vector, r2: Vector) -> Vector {
        self.kernel.grad(r1 - r2, 0.5 * (r1.h() + r2.h()))
    }
}
