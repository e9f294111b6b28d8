//! Symmetric and traceless-symmetric second-order tensors.
//!
//! `SymmetricTensor` stores the diagonal and the off-diagonal (xy, xz,
//! yz) as vectors. `TracelessTensor` stores only five independent
//! components; the z,z entry is reconstructed as -m00 - m11. Operations
//! that would break tracelessness restore it by subtracting tr/3 * I.

use crate::vector::{dot, Vector, X, Y, Z};
use std::f64::consts::PI;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SymmetricTensor {
    /// Diagonal components (xx, yy, zz).
    diag: Vector,
    /// Off-diagonal components (xy, xz, yz).
    off: Vector,
}

impl SymmetricTensor {
    pub fn new(diag: Vector, off: Vector) -> Self {
        SymmetricTensor { diag, off }
    }

    pub fn null() -> Self {
        SymmetricTensor {
            diag: Vector::zero(),
            off: Vector::zero(),
        }
    }

    pub fn identity() -> Self {
        SymmetricTensor {
            diag: Vector::new(1.0, 1.0, 1.0),
            off: Vector::zero(),
        }
    }

    /// Isotropic tensor value * I.
    pub fn isotropic(value: f64) -> Self {
        SymmetricTensor {
            diag: Vector::new(value, value, value),
            off: Vector::zero(),
        }
    }

    /// Symmetrized outer product (a (x) b + b (x) a) / 2.
    pub fn symmetric_outer(a: Vector, b: Vector) -> Self {
        SymmetricTensor {
            diag: Vector::new(a[X] * b[X], a[Y] * b[Y], a[Z] * b[Z]),
            off: Vector::new(
                0.5 * (a[X] * b[Y] + a[Y] * b[X]),
                0.5 * (a[X] * b[Z] + a[Z] * b[X]),
                0.5 * (a[Y] * b[Z] + a[Z] * b[Y]),
            ),
        }
    }

    pub fn diagonal(&self) -> Vector {
        self.diag
    }

    pub fn off_diagonal(&self) -> Vector {
        self.off
    }

    /// Component (i, j) with i, j in {X, Y, Z}.
    pub fn component(&self, i: usize, j: usize) -> f64 {
        if i == j {
            self.diag[i]
        } else {
            // map pair to the off-diagonal slot: xy=0, xz=1, yz=2
            self.off[i + j - 1]
        }
    }

    pub fn trace(&self) -> f64 {
        self.diag[X] + self.diag[Y] + self.diag[Z]
    }

    /// First invariant: the trace.
    pub fn invariant_1(&self) -> f64 {
        self.trace()
    }

    /// Second invariant: the sum of principal 2x2 minors.
    pub fn invariant_2(&self) -> f64 {
        let d = self.diag;
        let o = self.off;
        d[X] * d[Y] + d[X] * d[Z] + d[Y] * d[Z] - o[X] * o[X] - o[Y] * o[Y] - o[Z] * o[Z]
    }

    /// Third invariant: the determinant.
    pub fn invariant_3(&self) -> f64 {
        self.determinant()
    }

    pub fn determinant(&self) -> f64 {
        let d = self.diag;
        let o = self.off;
        d[X] * (d[Y] * d[Z] - o[Z] * o[Z]) - o[X] * (o[X] * d[Z] - o[Z] * o[Y])
            + o[Y] * (o[X] * o[Z] - d[Y] * o[Y])
    }

    pub fn inverse(&self) -> SymmetricTensor {
        let det = self.determinant();
        debug_assert!(det != 0.0);
        let d = self.diag;
        let o = self.off;
        let inv_det = 1.0 / det;
        SymmetricTensor {
            diag: Vector::new(
                (d[Y] * d[Z] - o[Z] * o[Z]) * inv_det,
                (d[X] * d[Z] - o[Y] * o[Y]) * inv_det,
                (d[X] * d[Y] - o[X] * o[X]) * inv_det,
            ),
            off: Vector::new(
                (o[Y] * o[Z] - o[X] * d[Z]) * inv_det,
                (o[X] * o[Z] - o[Y] * d[Y]) * inv_det,
                (o[X] * o[Y] - d[X] * o[Z]) * inv_det,
            ),
        }
    }

    /// Double-dot product A : B = sum_ij A_ij B_ij.
    pub fn ddot(&self, other: &SymmetricTensor) -> f64 {
        dot(self.diag, other.diag) + 2.0 * dot(self.off, other.off)
    }

    pub fn is_finite(&self) -> bool {
        self.diag.is_finite() && self.off.is_finite()
    }

    /// Analytic eigenvalues, descending. Uses the trigonometric solution
    /// of the characteristic cubic.
    pub fn eigenvalues(&self) -> [f64; 3] {
        let o = self.off;
        let p1 = o[X] * o[X] + o[Y] * o[Y] + o[Z] * o[Z];
        if p1 == 0.0 {
            let mut eig = [self.diag[X], self.diag[Y], self.diag[Z]];
            eig.sort_by(|a, b| b.total_cmp(a));
            return eig;
        }
        let q = self.trace() / 3.0;
        let d = self.diag;
        let p2 = (d[X] - q).powi(2) + (d[Y] - q).powi(2) + (d[Z] - q).powi(2) + 2.0 * p1;
        let p = (p2 / 6.0).sqrt();
        let b = (*self - SymmetricTensor::isotropic(q)) / p;
        let r = (0.5 * b.determinant()).clamp(-1.0, 1.0);
        let phi = r.acos() / 3.0;
        let eig1 = q + 2.0 * p * phi.cos();
        let eig3 = q + 2.0 * p * (phi + 2.0 * PI / 3.0).cos();
        let eig2 = 3.0 * q - eig1 - eig3;
        [eig1, eig2, eig3]
    }

    /// Largest eigenvalue; the maximum principal stress in the damage
    /// model.
    pub fn max_eigenvalue(&self) -> f64 {
        self.eigenvalues()[0]
    }

    /// Clamp every component to the given bounds.
    pub fn clamp(&self, lower: f64, upper: f64) -> SymmetricTensor {
        SymmetricTensor {
            diag: Vector::new(
                self.diag[X].clamp(lower, upper),
                self.diag[Y].clamp(lower, upper),
                self.diag[Z].clamp(lower, upper),
            ),
            off: Vector::new(
                self.off[X].clamp(lower, upper),
                self.off[Y].clamp(lower, upper),
                self.off[Z].clamp(lower, upper),
            ),
        }
    }
}

impl Mul<Vector> for SymmetricTensor {
    type Output = Vector;

    fn mul(self, v: Vector) -> Vector {
        let d = self.diag;
        let o = self.off;
        Vector::new(
            d[X] * v[X] + o[X] * v[Y] + o[Y] * v[Z],
            o[X] * v[X] + d[Y] * v[Y] + o[Z] * v[Z],
            o[Y] * v[X] + o[Z] * v[Y] + d[Z] * v[Z],
        )
    }
}

impl Add for SymmetricTensor {
    type Output = SymmetricTensor;

    fn add(self, other: SymmetricTensor) -> SymmetricTensor {
        SymmetricTensor {
            diag: self.diag + other.diag,
            off: self.off + other.off,
        }
    }
}

impl Sub for SymmetricTensor {
    type Output = SymmetricTensor;

    fn sub(self, other: SymmetricTensor) -> SymmetricTensor {
        SymmetricTensor {
            diag: self.diag - other.diag,
            off: self.off - other.off,
        }
    }
}

impl AddAssign for SymmetricTensor {
    fn add_assign(&mut self, other: SymmetricTensor) {
        self.diag += other.diag;
        self.off += other.off;
    }
}

impl Mul<f64> for SymmetricTensor {
    type Output = SymmetricTensor;

    fn mul(self, factor: f64) -> SymmetricTensor {
        SymmetricTensor {
            diag: self.diag * factor,
            off: self.off * factor,
        }
    }
}

impl Mul<SymmetricTensor> for f64 {
    type Output = SymmetricTensor;

    fn mul(self, t: SymmetricTensor) -> SymmetricTensor {
        t * self
    }
}

impl Div<f64> for SymmetricTensor {
    type Output = SymmetricTensor;

    fn div(self, factor: f64) -> SymmetricTensor {
        self * (1.0 / factor)
    }
}

impl Neg for SymmetricTensor {
    type Output = SymmetricTensor;

    fn neg(self) -> SymmetricTensor {
        self * -1.0
    }
}

impl Default for SymmetricTensor {
    fn default() -> Self {
        SymmetricTensor::null()
    }
}

/// Traceless symmetric tensor storing xx, yy, xy, xz, yz; zz is derived.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TracelessTensor {
    xx: f64,
    yy: f64,
    xy: f64,
    xz: f64,
    yz: f64,
}

impl TracelessTensor {
    pub fn new(xx: f64, yy: f64, xy: f64, xz: f64, yz: f64) -> Self {
        TracelessTensor { xx, yy, xy, xz, yz }
    }

    pub fn null() -> Self {
        TracelessTensor::default()
    }

    /// Tensor with every stored component set to `value`; a
    /// regularization helper for yield-criterion ratios.
    pub fn splat(value: f64) -> Self {
        TracelessTensor {
            xx: value,
            yy: value,
            xy: value,
            xz: value,
            yz: value,
        }
    }

    /// The traceless part of a symmetric tensor.
    pub fn from_symmetric(t: &SymmetricTensor) -> Self {
        let third = t.trace() / 3.0;
        let d = t.diagonal();
        let o = t.off_diagonal();
        TracelessTensor {
            xx: d[X] - third,
            yy: d[Y] - third,
            xy: o[X],
            xz: o[Y],
            yz: o[Z],
        }
    }

    pub fn to_symmetric(&self) -> SymmetricTensor {
        SymmetricTensor::new(
            Vector::new(self.xx, self.yy, self.zz()),
            Vector::new(self.xy, self.xz, self.yz),
        )
    }

    pub fn zz(&self) -> f64 {
        -self.xx - self.yy
    }

    pub fn component(&self, i: usize, j: usize) -> f64 {
        match (i.min(j), i.max(j)) {
            (X, X) => self.xx,
            (Y, Y) => self.yy,
            (Z, Z) => self.zz(),
            (X, Y) => self.xy,
            (X, Z) => self.xz,
            (Y, Z) => self.yz,
            _ => unreachable!(),
        }
    }

    pub fn diagonal(&self) -> Vector {
        Vector::new(self.xx, self.yy, self.zz())
    }

    pub fn ddot(&self, other: &TracelessTensor) -> f64 {
        self.xx * other.xx
            + self.yy * other.yy
            + self.zz() * other.zz()
            + 2.0 * (self.xy * other.xy + self.xz * other.xz + self.yz * other.yz)
    }

    pub fn is_finite(&self) -> bool {
        [self.xx, self.yy, self.xy, self.xz, self.yz]
            .iter()
            .all(|v| v.is_finite())
    }

    /// Clamp components in the symmetric representation, then restore
    /// tracelessness.
    pub fn clamp(&self, lower: f64, upper: f64) -> TracelessTensor {
        TracelessTensor::from_symmetric(&self.to_symmetric().clamp(lower, upper))
    }

    /// Largest absolute component, as a timestep scale.
    pub fn max_abs_component(&self) -> f64 {
        [self.xx, self.yy, self.zz(), self.xy, self.xz, self.yz]
            .iter()
            .fold(0.0_f64, |acc, v| acc.max(v.abs()))
    }
}

impl Mul<Vector> for TracelessTensor {
    type Output = Vector;

    fn mul(self, v: Vector) -> Vector {
        self.to_symmetric() * v
    }
}

impl Add for TracelessTensor {
    type Output = TracelessTensor;

    fn add(self, other: TracelessTensor) -> TracelessTensor {
        TracelessTensor {
            xx: self.xx + other.xx,
            yy: self.yy + other.yy,
            xy: self.xy + other.xy,
            xz: self.xz + other.xz,
            yz: self.yz + other.yz,
        }
    }
}

impl Sub for TracelessTensor {
    type Output = TracelessTensor;

    fn sub(self, other: TracelessTensor) -> TracelessTensor {
        TracelessTensor {
            xx: self.xx - other.xx,
            yy: self.yy - other.yy,
            xy: self.xy - other.xy,
            xz: self.xz - other.xz,
            yz: self.yz - other.yz,
        }
    }
}

impl AddAssign for TracelessTensor {
    fn add_assign(&mut self, other: TracelessTensor) {
        *self = *self + other;
    }
}

impl SubAssign for TracelessTensor {
    fn sub_assign(&mut self, other: TracelessTensor) {
        *self = *self - other;
    }
}

impl Mul<f64> for TracelessTensor {
    type Output = TracelessTensor;

    fn mul(self, factor: f64) -> TracelessTensor {
        TracelessTensor {
            xx: self.xx * factor,
            yy: self.yy * factor,
            xy: self.xy * factor,
            xz: self.xz * factor,
            yz: self.yz * factor,
        }
    }
}

impl Mul<TracelessTensor> for f64 {
    type Output = TracelessTensor;

    fn mul(self, t: TracelessTensor) -> TracelessTensor {
        t * self
    }
}

impl Div<f64> for TracelessTensor {
    type Output = TracelessTensor;

    fn div(self, factor: f64) -> TracelessTensor {
        self * (1.0 / factor)
    }
}

impl Neg for TracelessTensor {
    type Output = TracelessTensor;

    fn neg(self) -> TracelessTensor {
        self * -1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_lookup() {
        let t = SymmetricTensor::new(Vector::new(1.0, 2.0, 3.0), Vector::new(4.0, 5.0, 6.0));
        assert_eq!(t.component(X, X), 1.0);
        assert_eq!(t.component(Z, Z), 3.0);
        assert_eq!(t.component(X, Y), 4.0);
        assert_eq!(t.component(Y, X), 4.0);
        assert_eq!(t.component(X, Z), 5.0);
        assert_eq!(t.component(Y, Z), 6.0);
    }

    #[test]
    fn test_apply_to_vector() {
        let t = SymmetricTensor::new(Vector::new(2.0, 3.0, 4.0), Vector::new(1.0, 0.0, 0.0));
        let v = Vector::new(1.0, 1.0, 1.0);
        assert_eq!(t * v, Vector::new(3.0, 4.0, 4.0));
    }

    #[test]
    fn test_inverse_times_self_is_identity() {
        let t = SymmetricTensor::new(Vector::new(4.0, 5.0, 6.0), Vector::new(1.0, 0.5, -0.5));
        let inv = t.inverse();
        let v = Vector::new(0.3, -1.2, 2.5);
        let round_trip = inv * (t * v);
        for axis in 0..3 {
            assert!((round_trip[axis] - v[axis]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_eigenvalues_diagonal() {
        let t = SymmetricTensor::new(Vector::new(3.0, -1.0, 2.0), Vector::zero());
        let eig = t.eigenvalues();
        assert_eq!(eig, [3.0, 2.0, -1.0]);
    }

    #[test]
    fn test_eigenvalues_satisfy_invariants() {
        let t = SymmetricTensor::new(Vector::new(2.0, 1.0, -3.0), Vector::new(0.7, -0.4, 1.1));
        let [e1, e2, e3] = t.eigenvalues();
        assert!((e1 + e2 + e3 - t.invariant_1()).abs() < 1e-10);
        assert!((e1 * e2 + e1 * e3 + e2 * e3 - t.invariant_2()).abs() < 1e-9);
        assert!((e1 * e2 * e3 - t.invariant_3()).abs() < 1e-9);
        assert!(e1 >= e2 && e2 >= e3);
    }

    #[test]
    fn test_traceless_roundtrip_and_trace() {
        let t = SymmetricTensor::new(Vector::new(2.0, -1.0, 4.0), Vector::new(0.5, 0.1, -0.2));
        let tl = TracelessTensor::from_symmetric(&t);
        assert!((tl.to_symmetric().trace()).abs() < 1e-14);
        // deviatoric part is unchanged
        let dev = t - SymmetricTensor::isotropic(t.trace() / 3.0);
        assert!((tl.component(X, X) - dev.component(X, X)).abs() < 1e-14);
        assert!((tl.component(Y, Z) - dev.component(Y, Z)).abs() < 1e-14);
    }

    #[test]
    fn test_traceless_clamp_restores_trace() {
        let tl = TracelessTensor::new(5.0, -3.0, 2.0, 0.0, 0.0);
        let clamped = tl.clamp(-1.0, 1.0);
        assert!(clamped.to_symmetric().trace().abs() < 1e-14);
    }

    #[test]
    fn test_ddot_matches_symmetric() {
        let a = TracelessTensor::new(1.0, 2.0, 3.0, -1.0, 0.5);
        let b = TracelessTensor::new(-2.0, 0.5, 1.0, 2.0, -0.25);
        let via_sym = a.to_symmetric().ddot(&b.to_symmetric());
        assert!((a.ddot(&b) - via_sym).abs() < 1e-12);
    }
}
