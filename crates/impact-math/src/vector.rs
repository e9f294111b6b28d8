//! Four-lane particle vector.
//!
//! Lanes X, Y, Z are geometric coordinates; the fourth lane H carries the
//! smoothing length of the particle (or its time derivative for velocity
//! and acceleration buffers, so h integrates as an ordinary component).
//! Element-wise arithmetic acts on all four lanes; geometric reductions
//! (dot product, cross product, length) read only the first three.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Div, Index, IndexMut, Mul, Neg, Sub, SubAssign};

pub const X: usize = 0;
pub const Y: usize = 1;
pub const Z: usize = 2;
pub const H: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vector([f64; 4]);

impl Vector {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Vector([x, y, z, 0.0])
    }

    pub const fn with_h(x: f64, y: f64, z: f64, h: f64) -> Self {
        Vector([x, y, z, h])
    }

    pub const fn zero() -> Self {
        Vector([0.0; 4])
    }

    pub const fn splat(value: f64) -> Self {
        Vector([value, value, value, value])
    }

    /// Unit vector along the given axis (X, Y or Z).
    pub fn unit(axis: usize) -> Self {
        debug_assert!(axis < 3);
        let mut v = Vector::zero();
        v.0[axis] = 1.0;
        v
    }

    pub fn h(&self) -> f64 {
        self.0[H]
    }

    pub fn set_h(&mut self, h: f64) {
        self.0[H] = h;
    }

    /// Copy with a replaced smoothing-length lane.
    pub fn of_h(mut self, h: f64) -> Self {
        self.0[H] = h;
        self
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }
}

pub fn dot(a: Vector, b: Vector) -> f64 {
    a[X] * b[X] + a[Y] * b[Y] + a[Z] * b[Z]
}

pub fn cross(a: Vector, b: Vector) -> Vector {
    Vector::new(
        a[Y] * b[Z] - a[Z] * b[Y],
        a[Z] * b[X] - a[X] * b[Z],
        a[X] * b[Y] - a[Y] * b[X],
    )
}

pub fn sqr_length(v: Vector) -> f64 {
    dot(v, v)
}

pub fn length(v: Vector) -> f64 {
    sqr_length(v).sqrt()
}

pub fn normalized(v: Vector) -> Vector {
    let len = length(v);
    debug_assert!(len > 0.0);
    Vector::new(v[X] / len, v[Y] / len, v[Z] / len)
}

/// Component-wise minimum of the geometric lanes.
pub fn min_element_wise(a: Vector, b: Vector) -> Vector {
    Vector::new(a[X].min(b[X]), a[Y].min(b[Y]), a[Z].min(b[Z]))
}

/// Component-wise maximum of the geometric lanes.
pub fn max_element_wise(a: Vector, b: Vector) -> Vector {
    Vector::new(a[X].max(b[X]), a[Y].max(b[Y]), a[Z].max(b[Z]))
}

impl Index<usize> for Vector {
    type Output = f64;

    fn index(&self, index: usize) -> &f64 {
        &self.0[index]
    }
}

impl IndexMut<usize> for Vector {
    fn index_mut(&mut self, index: usize) -> &mut f64 {
        &mut self.0[index]
    }
}

impl Add for Vector {
    type Output = Vector;

    fn add(self, other: Vector) -> Vector {
        Vector([
            self.0[0] + other.0[0],
            self.0[1] + other.0[1],
            self.0[2] + other.0[2],
            self.0[3] + other.0[3],
        ])
    }
}

impl Sub for Vector {
    type Output = Vector;

    fn sub(self, other: Vector) -> Vector {
        Vector([
            self.0[0] - other.0[0],
            self.0[1] - other.0[1],
            self.0[2] - other.0[2],
            self.0[3] - other.0[3],
        ])
    }
}

impl AddAssign for Vector {
    fn add_assign(&mut self, other: Vector) {
        *self = *self + other;
    }
}

impl SubAssign for Vector {
    fn sub_assign(&mut self, other: Vector) {
        *self = *self - other;
    }
}

impl Neg for Vector {
    type Output = Vector;

    fn neg(self) -> Vector {
        Vector([-self.0[0], -self.0[1], -self.0[2], -self.0[3]])
    }
}

impl Mul<f64> for Vector {
    type Output = Vector;

    fn mul(self, factor: f64) -> Vector {
        Vector([
            self.0[0] * factor,
            self.0[1] * factor,
            self.0[2] * factor,
            self.0[3] * factor,
        ])
    }
}

impl Mul<Vector> for f64 {
    type Output = Vector;

    fn mul(self, v: Vector) -> Vector {
        v * self
    }
}

impl Div<f64> for Vector {
    type Output = Vector;

    fn div(self, factor: f64) -> Vector {
        debug_assert!(factor != 0.0);
        self * (1.0 / factor)
    }
}

impl Default for Vector {
    fn default() -> Self {
        Vector::zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arithmetic_acts_on_all_lanes() {
        let a = Vector::with_h(1.0, 2.0, 3.0, 0.5);
        let b = Vector::with_h(4.0, 5.0, 6.0, 0.25);
        let sum = a + b;
        assert_eq!(sum, Vector::with_h(5.0, 7.0, 9.0, 0.75));
        let scaled = a * 2.0;
        assert_eq!(scaled.h(), 1.0);
    }

    #[test]
    fn test_dot_ignores_h_lane() {
        let a = Vector::with_h(1.0, 0.0, 0.0, 100.0);
        let b = Vector::with_h(1.0, 0.0, 0.0, 100.0);
        assert_eq!(dot(a, b), 1.0);
        assert_eq!(length(a), 1.0);
    }

    #[test]
    fn test_cross_right_handed() {
        let x = Vector::unit(X);
        let y = Vector::unit(Y);
        let z = cross(x, y);
        assert_eq!(z, Vector::unit(Z));
        assert_eq!(dot(z, x), 0.0);
    }

    #[test]
    fn test_normalized_unit_length() {
        let v = Vector::new(3.0, 4.0, 0.0);
        let n = normalized(v);
        assert!((length(n) - 1.0).abs() < 1e-15);
    }
}
