//! Geometric and numerical primitives for SCPN Impact Core.

pub mod affine;
pub mod interval;
pub mod kernel;
pub mod multipole;
pub mod tensor;
pub mod vector;

pub use interval::Interval;
pub use tensor::{SymmetricTensor, TracelessTensor};
pub use vector::{Vector, H, X, Y, Z};
