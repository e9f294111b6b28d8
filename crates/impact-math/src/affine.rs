//! General 3x3 matrix with rotation constructors.

use crate::tensor::SymmetricTensor;
use crate::vector::{dot, Vector, X, Y, Z};
use std::ops::{Add, Mul, Sub};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineMatrix {
    rows: [Vector; 3],
}

impl AffineMatrix {
    pub fn new(row0: Vector, row1: Vector, row2: Vector) -> Self {
        AffineMatrix {
            rows: [row0, row1, row2],
        }
    }

    pub fn identity() -> Self {
        AffineMatrix::new(Vector::unit(X), Vector::unit(Y), Vector::unit(Z))
    }

    pub fn null() -> Self {
        AffineMatrix::new(Vector::zero(), Vector::zero(), Vector::zero())
    }

    pub fn row(&self, i: usize) -> Vector {
        self.rows[i]
    }

    pub fn component(&self, i: usize, j: usize) -> f64 {
        self.rows[i][j]
    }

    pub fn transpose(&self) -> AffineMatrix {
        AffineMatrix::new(
            Vector::new(self.rows[0][X], self.rows[1][X], self.rows[2][X]),
            Vector::new(self.rows[0][Y], self.rows[1][Y], self.rows[2][Y]),
            Vector::new(self.rows[0][Z], self.rows[1][Z], self.rows[2][Z]),
        )
    }

    /// Matrix L such that L * v == cross(w, v).
    pub fn cross_product_operator(w: Vector) -> AffineMatrix {
        AffineMatrix::new(
            Vector::new(0.0, -w[Z], w[Y]),
            Vector::new(w[Z], 0.0, -w[X]),
            Vector::new(-w[Y], w[X], 0.0),
        )
    }

    /// Rotation by `angle` around a unit `axis` (Rodrigues formula).
    pub fn rotation_axis(axis: Vector, angle: f64) -> AffineMatrix {
        let (sin, cos) = angle.sin_cos();
        let k = AffineMatrix::cross_product_operator(axis);
        AffineMatrix::identity() + k * sin + (k * k) * (1.0 - cos)
    }

    pub fn from_symmetric(t: &SymmetricTensor) -> AffineMatrix {
        AffineMatrix::new(
            Vector::new(t.component(X, X), t.component(X, Y), t.component(X, Z)),
            Vector::new(t.component(X, Y), t.component(Y, Y), t.component(Y, Z)),
            Vector::new(t.component(X, Z), t.component(Y, Z), t.component(Z, Z)),
        )
    }

    /// Symmetric part (m + m^T) / 2 as a SymmetricTensor.
    pub fn symmetrize(&self) -> SymmetricTensor {
        SymmetricTensor::new(
            Vector::new(self.rows[0][X], self.rows[1][Y], self.rows[2][Z]),
            Vector::new(
                0.5 * (self.rows[0][Y] + self.rows[1][X]),
                0.5 * (self.rows[0][Z] + self.rows[2][X]),
                0.5 * (self.rows[1][Z] + self.rows[2][Y]),
            ),
        )
    }

    pub fn determinant(&self) -> f64 {
        dot(
            self.rows[0],
            crate::vector::cross(self.rows[1], self.rows[2]),
        )
    }
}

impl Mul<Vector> for AffineMatrix {
    type Output = Vector;

    fn mul(self, v: Vector) -> Vector {
        Vector::new(
            dot(self.rows[0], v),
            dot(self.rows[1], v),
            dot(self.rows[2], v),
        )
    }
}

impl Mul for AffineMatrix {
    type Output = AffineMatrix;

    fn mul(self, other: AffineMatrix) -> AffineMatrix {
        let t = other.transpose();
        AffineMatrix::new(
            Vector::new(
                dot(self.rows[0], t.rows[0]),
                dot(self.rows[0], t.rows[1]),
                dot(self.rows[0], t.rows[2]),
            ),
            Vector::new(
                dot(self.rows[1], t.rows[0]),
                dot(self.rows[1], t.rows[1]),
                dot(self.rows[1], t.rows[2]),
            ),
            Vector::new(
                dot(self.rows[2], t.rows[0]),
                dot(self.rows[2], t.rows[1]),
                dot(self.rows[2], t.rows[2]),
            ),
        )
    }
}

impl Mul<f64> for AffineMatrix {
    type Output = AffineMatrix;

    fn mul(self, factor: f64) -> AffineMatrix {
        AffineMatrix::new(
            self.rows[0] * factor,
            self.rows[1] * factor,
            self.rows[2] * factor,
        )
    }
}

impl Add for AffineMatrix {
    type Output = AffineMatrix;

    fn add(self, other: AffineMatrix) -> AffineMatrix {
        AffineMatrix::new(
            self.rows[0] + other.rows[0],
            self.rows[1] + other.rows[1],
            self.rows[2] + other.rows[2],
        )
    }
}

impl Sub for AffineMatrix {
    type Output = AffineMatrix;

    fn sub(self, other: AffineMatrix) -> AffineMatrix {
        AffineMatrix::new(
            self.rows[0] - other.rows[0],
            self.rows[1] - other.rows[1],
            self.rows[2] - other.rows[2],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::cross;
    use std::f64::consts::PI;

    #[test]
    fn test_cross_product_operator() {
        let w = Vector::new(1.0, 2.0, 3.0);
        let v = Vector::new(-0.5, 0.25, 1.0);
        let expected = cross(w, v);
        let result = AffineMatrix::cross_product_operator(w) * v;
        for axis in 0..3 {
            assert!((result[axis] - expected[axis]).abs() < 1e-14);
        }
    }

    #[test]
    fn test_rotation_quarter_turn() {
        let rot = AffineMatrix::rotation_axis(Vector::unit(Z), PI / 2.0);
        let v = rot * Vector::unit(X);
        assert!((v[X]).abs() < 1e-14);
        assert!((v[Y] - 1.0).abs() < 1e-14);
    }

    #[test]
    fn test_rotation_is_orthogonal() {
        let axis = crate::vector::normalized(Vector::new(1.0, -1.0, 0.5));
        let rot = AffineMatrix::rotation_axis(axis, 0.7);
        let product = rot * rot.transpose();
        let id = AffineMatrix::identity();
        for i in 0..3 {
            for j in 0..3 {
                assert!((product.component(i, j) - id.component(i, j)).abs() < 1e-14);
            }
        }
        assert!((rot.determinant() - 1.0).abs() < 1e-14);
    }
}
