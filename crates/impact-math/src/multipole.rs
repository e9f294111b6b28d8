//! Cartesian multipole moments up to hexadecapole.
//!
//! A multipole of order N is a fully symmetric N-index tensor over three
//! dimensions, stored as its canonical components (sorted multi-indices)
//! with permutation multiplicities applied during contractions. The
//! traceless (reduced) variant stores only the 2N+1 independent
//! components; components with two or more z indices are reconstructed
//! through the traceless constraint T_..zz = -T_..xx - T_..yy.
//!
//! The reduction follows the detracer formula
//!   q~ = sum_m c_{n,m} delta^(m) (x) trace^m(q),
//!   c_{n,m} = (-1)^m (2N-2m-1)!! / (m! (2N-1)!!),
//! and the gravitational field of a reduced moment is evaluated with the
//! Green-function derivatives gamma_{n+1} = -(2n+1)/r^2 gamma_n,
//! gamma_0 = -1/r.

use crate::vector::Vector;

pub const MAX_ORDER: usize = 4;

/// Number of canonical components of a symmetric tensor of each order.
const COMPONENT_COUNT: [usize; 5] = [1, 3, 6, 10, 15];

/// Number of stored components of a traceless tensor of each order.
const REDUCED_COUNT: [usize; 5] = [1, 3, 5, 7, 9];

// Canonical sorted multi-indices, padded to four entries; only the first
// `order` entries of each row are meaningful.
const CANON_0: [[u8; 4]; 1] = [[0; 4]];
const CANON_1: [[u8; 4]; 3] = [[0, 0, 0, 0], [1, 0, 0, 0], [2, 0, 0, 0]];
const CANON_2: [[u8; 4]; 6] = [
    [0, 0, 0, 0],
    [0, 1, 0, 0],
    [0, 2, 0, 0],
    [1, 1, 0, 0],
    [1, 2, 0, 0],
    [2, 2, 0, 0],
];
const CANON_3: [[u8; 4]; 10] = [
    [0, 0, 0, 0],
    [0, 0, 1, 0],
    [0, 0, 2, 0],
    [0, 1, 1, 0],
    [0, 1, 2, 0],
    [0, 2, 2, 0],
    [1, 1, 1, 0],
    [1, 1, 2, 0],
    [1, 2, 2, 0],
    [2, 2, 2, 0],
];
const CANON_4: [[u8; 4]; 15] = [
    [0, 0, 0, 0],
    [0, 0, 0, 1],
    [0, 0, 0, 2],
    [0, 0, 1, 1],
    [0, 0, 1, 2],
    [0, 0, 2, 2],
    [0, 1, 1, 1],
    [0, 1, 1, 2],
    [0, 1, 2, 2],
    [0, 2, 2, 2],
    [1, 1, 1, 1],
    [1, 1, 1, 2],
    [1, 1, 2, 2],
    [1, 2, 2, 2],
    [2, 2, 2, 2],
];

// Stored (z-count <= 1) multi-indices of the traceless representation.
const REDUCED_0: [[u8; 4]; 1] = [[0; 4]];
const REDUCED_1: [[u8; 4]; 3] = CANON_1;
const REDUCED_2: [[u8; 4]; 5] = [
    [0, 0, 0, 0],
    [0, 1, 0, 0],
    [0, 2, 0, 0],
    [1, 1, 0, 0],
    [1, 2, 0, 0],
];
const REDUCED_3: [[u8; 4]; 7] = [
    [0, 0, 0, 0],
    [0, 0, 1, 0],
    [0, 0, 2, 0],
    [0, 1, 1, 0],
    [0, 1, 2, 0],
    [1, 1, 1, 0],
    [1, 1, 2, 0],
];
const REDUCED_4: [[u8; 4]; 9] = [
    [0, 0, 0, 0],
    [0, 0, 0, 1],
    [0, 0, 0, 2],
    [0, 0, 1, 1],
    [0, 0, 1, 2],
    [0, 1, 1, 1],
    [0, 1, 1, 2],
    [1, 1, 1, 1],
    [1, 1, 1, 2],
];

fn canonical(order: usize) -> &'static [[u8; 4]] {
    match order {
        0 => &CANON_0,
        1 => &CANON_1,
        2 => &CANON_2,
        3 => &CANON_3,
        4 => &CANON_4,
        _ => unreachable!("multipole order above {}", MAX_ORDER),
    }
}

fn reduced_canonical(order: usize) -> &'static [[u8; 4]] {
    match order {
        0 => &REDUCED_0,
        1 => &REDUCED_1,
        2 => &REDUCED_2,
        3 => &REDUCED_3,
        4 => &REDUCED_4,
        _ => unreachable!("multipole order above {}", MAX_ORDER),
    }
}

fn sort_idx(order: usize, idx: &mut [u8; 4]) {
    idx[..order].sort_unstable();
}

fn find_slot(table: &[[u8; 4]], order: usize, idx: [u8; 4]) -> usize {
    for (slot, row) in table.iter().enumerate() {
        if row[..order] == idx[..order] {
            return slot;
        }
    }
    unreachable!("multi-index not canonical");
}

/// Number of distinct permutations of a sorted multi-index.
fn multiplicity(order: usize, idx: [u8; 4]) -> f64 {
    const FACT: [f64; 5] = [1.0, 1.0, 2.0, 6.0, 24.0];
    let mut counts = [0usize; 3];
    for &value in &idx[..order] {
        counts[value as usize] += 1;
    }
    FACT[order] / (FACT[counts[0]] * FACT[counts[1]] * FACT[counts[2]])
}

fn double_factorial(n: i64) -> f64 {
    let mut result = 1.0;
    let mut k = n;
    while k > 1 {
        result *= k as f64;
        k -= 2;
    }
    result
}

fn factorial(n: usize) -> f64 {
    (1..=n).map(|k| k as f64).product()
}

/// Fully symmetric Cartesian multipole of order <= 4.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Multipole {
    order: usize,
    c: [f64; 15],
}

impl Multipole {
    pub fn zero(order: usize) -> Self {
        debug_assert!(order <= MAX_ORDER);
        Multipole { order, c: [0.0; 15] }
    }

    pub fn monopole(value: f64) -> Self {
        let mut m = Multipole::zero(0);
        m.c[0] = value;
        m
    }

    /// The outer power dr^(x)order scaled by `mass`.
    pub fn from_outer(dr: Vector, order: usize, mass: f64) -> Self {
        let mut m = Multipole::zero(order);
        for (slot, idx) in canonical(order).iter().enumerate() {
            let mut product = mass;
            for &axis in &idx[..order] {
                product *= dr[axis as usize];
            }
            m.c[slot] = product;
        }
        m
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn value(&self) -> f64 {
        debug_assert!(self.order == 0);
        self.c[0]
    }

    pub fn vector(&self) -> Vector {
        debug_assert!(self.order == 1);
        Vector::new(self.c[0], self.c[1], self.c[2])
    }

    /// Component at a (not necessarily sorted) multi-index.
    pub fn at(&self, mut idx: [u8; 4]) -> f64 {
        sort_idx(self.order, &mut idx);
        self.c[find_slot(canonical(self.order), self.order, idx)]
    }

    pub fn add_assign(&mut self, other: &Multipole) {
        debug_assert!(self.order == other.order);
        for slot in 0..COMPONENT_COUNT[self.order] {
            self.c[slot] += other.c[slot];
        }
    }

    pub fn scale(&self, factor: f64) -> Multipole {
        let mut out = *self;
        for slot in 0..COMPONENT_COUNT[self.order] {
            out.c[slot] *= factor;
        }
        out
    }

    /// Contraction over the last index pair, T_J = sum_a M_{J a a}.
    pub fn trace(&self) -> Multipole {
        debug_assert!(self.order >= 2);
        let result_order = self.order - 2;
        let mut out = Multipole::zero(result_order);
        for (slot, idx) in canonical(result_order).iter().enumerate() {
            let mut sum = 0.0;
            for axis in 0..3u8 {
                let mut full = *idx;
                full[result_order] = axis;
                full[result_order + 1] = axis;
                sum += self.at(full);
            }
            out.c[slot] = sum;
        }
        out
    }

    /// Contraction with a vector over the last index.
    pub fn contract_vector(&self, v: Vector) -> Multipole {
        debug_assert!(self.order >= 1);
        let result_order = self.order - 1;
        let mut out = Multipole::zero(result_order);
        for (slot, idx) in canonical(result_order).iter().enumerate() {
            let mut sum = 0.0;
            for axis in 0..3u8 {
                let mut full = *idx;
                full[result_order] = axis;
                sum += self.at(full) * v[axis as usize];
            }
            out.c[slot] = sum;
        }
        out
    }

    /// Symmetrized product of `pairs` Kronecker deltas with a tensor of
    /// order `self.order - 2 * pairs`: the sum over all distinct
    /// assignments of index pairs to the deltas.
    fn delta_product(inner: &Multipole, order: usize, pairs: usize) -> Multipole {
        debug_assert!(inner.order + 2 * pairs == order);
        let mut out = Multipole::zero(order);
        for (slot, idx) in canonical(order).iter().enumerate() {
            out.c[slot] = delta_product_component(inner, &idx[..order], pairs);
        }
        out
    }

    /// Traceless (reduced) part via the detracer formula. The reduction
    /// coefficient c_{n,m} carries 1/m! for ordered delta lists; the
    /// pairing enumeration below visits each unordered delta set once,
    /// which absorbs that factor.
    pub fn reduced(&self) -> TracelessMultipole {
        let n = self.order;
        let mut full = Multipole::zero(n);
        let mut trace = *self;
        for m in 0..=(n / 2) {
            let sign = if m % 2 == 0 { 1.0 } else { -1.0 };
            let factor = sign * double_factorial(2 * n as i64 - 2 * m as i64 - 1)
                / double_factorial(2 * n as i64 - 1);
            let term = Multipole::delta_product(&trace, n, m);
            for slot in 0..COMPONENT_COUNT[n] {
                full.c[slot] += factor * term.c[slot];
            }
            if trace.order >= 2 {
                trace = trace.trace();
            } else {
                break;
            }
        }
        TracelessMultipole::from_full(&full)
    }
}

/// One component of the symmetrized delta product: enumerate every set
/// of `pairs` disjoint unordered index-position pairs, multiply the
/// delta values with the inner tensor component over the remaining
/// positions.
fn delta_product_component(inner: &Multipole, idx: &[u8], pairs: usize) -> f64 {
    if pairs == 0 {
        let mut padded = [0u8; 4];
        padded[..idx.len()].copy_from_slice(idx);
        return inner.at(padded);
    }
    let n = idx.len();
    let mut total = 0.0;
    // subsets of 2*pairs positions assigned to deltas
    for mask in 0u32..(1 << n) {
        if mask.count_ones() as usize != 2 * pairs {
            continue;
        }
        let positions: Vec<usize> = (0..n).filter(|p| mask & (1 << p) != 0).collect();
        let rest: Vec<u8> = (0..n)
            .filter(|p| mask & (1 << p) == 0)
            .map(|p| idx[p])
            .collect();
        let mut padded = [0u8; 4];
        padded[..rest.len()].copy_from_slice(&rest);
        let inner_value = inner.at(padded);
        if inner_value == 0.0 {
            continue;
        }
        total += inner_value * sum_over_matchings(idx, &positions);
    }
    total
}

/// Sum of products of deltas over all perfect matchings of `positions`.
fn sum_over_matchings(idx: &[u8], positions: &[usize]) -> f64 {
    if positions.is_empty() {
        return 1.0;
    }
    let first = positions[0];
    let mut total = 0.0;
    for k in 1..positions.len() {
        if idx[first] != idx[positions[k]] {
            continue; // delta vanishes
        }
        let remaining: Vec<usize> = positions[1..]
            .iter()
            .copied()
            .filter(|&p| p != positions[k])
            .collect();
        total += sum_over_matchings(idx, &remaining);
    }
    total
}

/// Traceless symmetric multipole storing 2N+1 components.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TracelessMultipole {
    order: usize,
    c: [f64; 9],
}

impl TracelessMultipole {
    pub fn zero(order: usize) -> Self {
        debug_assert!(order <= MAX_ORDER);
        TracelessMultipole { order, c: [0.0; 9] }
    }

    pub fn monopole(value: f64) -> Self {
        let mut m = TracelessMultipole::zero(0);
        m.c[0] = value;
        m
    }

    fn from_full(full: &Multipole) -> Self {
        let order = full.order;
        let mut out = TracelessMultipole::zero(order);
        for (slot, idx) in reduced_canonical(order).iter().enumerate() {
            out.c[slot] = full.at(*idx);
        }
        out
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn value(&self) -> f64 {
        debug_assert!(self.order == 0);
        self.c[0]
    }

    pub fn vector(&self) -> Vector {
        debug_assert!(self.order == 1);
        Vector::new(self.c[0], self.c[1], self.c[2])
    }

    /// Component at a multi-index; entries with two or more z indices
    /// are reconstructed through the traceless constraint.
    pub fn at(&self, mut idx: [u8; 4]) -> f64 {
        sort_idx(self.order, &mut idx);
        self.component_sorted(idx)
    }

    fn component_sorted(&self, idx: [u8; 4]) -> f64 {
        let z_count = idx[..self.order].iter().filter(|&&a| a == 2).count();
        if z_count <= 1 {
            return self.c[find_slot(reduced_canonical(self.order), self.order, idx)];
        }
        // T_..zz = -T_..xx - T_..yy; the sorted index keeps z's last
        let mut with_x = idx;
        with_x[self.order - 2] = 0;
        with_x[self.order - 1] = 0;
        sort_idx(self.order, &mut with_x);
        let mut with_y = idx;
        with_y[self.order - 2] = 1;
        with_y[self.order - 1] = 1;
        sort_idx(self.order, &mut with_y);
        -self.component_sorted(with_x) - self.component_sorted(with_y)
    }

    pub fn to_full(&self) -> Multipole {
        let mut full = Multipole::zero(self.order);
        for (slot, idx) in canonical(self.order).iter().enumerate() {
            full.c[slot] = self.at(*idx);
        }
        full
    }

    pub fn add_assign(&mut self, other: &TracelessMultipole) {
        debug_assert!(self.order == other.order);
        for slot in 0..REDUCED_COUNT[self.order] {
            self.c[slot] += other.c[slot];
        }
    }

    pub fn norm_sqr(&self) -> f64 {
        let full = self.to_full();
        let mut sum = 0.0;
        for (slot, idx) in canonical(self.order).iter().enumerate() {
            sum += multiplicity(self.order, *idx) * full.c[slot] * full.c[slot];
        }
        sum
    }
}

/// Expansion of a mass distribution about a centre: traceless moments of
/// order 0 through 4 (orders above the configured limit stay zero).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MultipoleExpansion {
    orders: [TracelessMultipole; MAX_ORDER + 1],
}

impl MultipoleExpansion {
    pub fn zero() -> Self {
        MultipoleExpansion {
            orders: [
                TracelessMultipole::zero(0),
                TracelessMultipole::zero(1),
                TracelessMultipole::zero(2),
                TracelessMultipole::zero(3),
                TracelessMultipole::zero(4),
            ],
        }
    }

    /// Moments of point masses about `center`, up to `max_order`.
    pub fn from_points(
        positions: &[Vector],
        masses: &[f64],
        center: Vector,
        max_order: usize,
    ) -> Self {
        debug_assert!(max_order <= MAX_ORDER);
        let mut expansion = MultipoleExpansion::zero();
        for order in 0..=max_order {
            let mut full = Multipole::zero(order);
            for (position, &mass) in positions.iter().zip(masses) {
                full.add_assign(&Multipole::from_outer(*position - center, order, mass));
            }
            expansion.orders[order] = full.reduced();
        }
        expansion
    }

    pub fn order(&self, order: usize) -> &TracelessMultipole {
        &self.orders[order]
    }

    pub fn total_mass(&self) -> f64 {
        self.orders[0].value()
    }

    pub fn add_assign(&mut self, other: &MultipoleExpansion) {
        for order in 0..=MAX_ORDER {
            self.orders[order].add_assign(&other.orders[order]);
        }
    }

    /// Parallel-axis shift: moments about `center + d` expressed from
    /// moments about `center`. Exact for traceless expansions; shifting
    /// by d and then by -d is the identity.
    pub fn shifted(&self, d: Vector, max_order: usize) -> MultipoleExpansion {
        let mut out = MultipoleExpansion::zero();
        let fulls: Vec<Multipole> = (0..=max_order).map(|n| self.orders[n].to_full()).collect();
        // moving the centre by d turns each offset a into a - d
        let shift = -d;
        for n in 0..=max_order {
            let mut shifted = Multipole::zero(n);
            for (slot, idx) in canonical(n).iter().enumerate() {
                let mut sum = 0.0;
                // every assignment of index positions to the original
                // moment vs. the displacement
                for mask in 0u32..(1 << n) {
                    let k = mask.count_ones() as usize;
                    let mut kept = [0u8; 4];
                    let mut kept_len = 0;
                    let mut shift_product = 1.0;
                    for position in 0..n {
                        if mask & (1 << position) != 0 {
                            kept[kept_len] = idx[position];
                            kept_len += 1;
                        } else {
                            shift_product *= shift[idx[position] as usize];
                        }
                    }
                    sum += fulls[k].at(kept) * shift_product;
                }
                shifted.c[slot] = sum;
            }
            out.orders[n] = shifted.reduced();
        }
        out
    }

    /// Gravitational acceleration of this expansion at displacement
    /// `dr` = centre - field point, without the gravitational constant.
    pub fn evaluate_acceleration(&self, dr: Vector, max_order: usize) -> Vector {
        let inv_dist_sqr = 1.0 / crate::vector::sqr_length(dr);
        let mut gamma = [0.0; MAX_ORDER + 2];
        gamma[0] = -inv_dist_sqr.sqrt();
        for m in 1..=(max_order + 1) {
            gamma[m] = -((2 * m - 1) as f64) * inv_dist_sqr * gamma[m - 1];
        }

        let mut acc = Vector::zero();
        for n in 0..=max_order {
            let q = self.orders[n].to_full();
            // contract with dr down to a vector and a scalar
            let mut contracted = q;
            for _ in 0..n.saturating_sub(1) {
                contracted = contracted.contract_vector(dr);
            }
            if n >= 1 {
                let q1 = contracted.scale(1.0 / factorial(n - 1));
                acc += gamma[n] * q1.vector();
                contracted = contracted.contract_vector(dr);
            }
            let q0 = contracted.value() / factorial(n);
            acc += gamma[n + 1] * q0 * dr;
        }
        acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::{length, sqr_length};

    fn tetrahedron() -> Vec<Vector> {
        // regular tetrahedron of side 1 centred at the origin
        let a = 1.0 / (2.0 * (2.0f64).sqrt());
        vec![
            Vector::new(a, a, a),
            Vector::new(a, -a, -a),
            Vector::new(-a, a, -a),
            Vector::new(-a, -a, a),
        ]
    }

    fn trace_of_reduced(q: &TracelessMultipole) -> f64 {
        if q.order() < 2 {
            return 0.0;
        }
        q.to_full().trace().c[..COMPONENT_COUNT[q.order() - 2]]
            .iter()
            .map(|v| v.abs())
            .fold(0.0, f64::max)
    }

    #[test]
    fn test_multiplicity() {
        assert_eq!(multiplicity(2, [0, 1, 0, 0]), 2.0);
        assert_eq!(multiplicity(2, [0, 0, 0, 0]), 1.0);
        assert_eq!(multiplicity(3, [0, 1, 2, 0]), 6.0);
        assert_eq!(multiplicity(4, [0, 0, 1, 1]), 6.0);
    }

    #[test]
    fn test_reduced_multipole_is_traceless() {
        // pseudo-random cloud; every order 2..4 must reduce to a
        // traceless tensor
        let positions: Vec<Vector> = (0..12)
            .map(|i| {
                let t = i as f64;
                Vector::new(
                    (1.3 * t).sin(),
                    (0.7 * t + 0.4).cos(),
                    (2.1 * t).sin() * 0.5,
                )
            })
            .collect();
        let masses = vec![1.0; positions.len()];
        for order in 2..=MAX_ORDER {
            let mut full = Multipole::zero(order);
            for (r, &m) in positions.iter().zip(&masses) {
                full.add_assign(&Multipole::from_outer(*r, order, m));
            }
            let reduced = full.reduced();
            assert!(
                trace_of_reduced(&reduced) < 1e-12,
                "order {} trace = {}",
                order,
                trace_of_reduced(&reduced)
            );
        }
    }

    #[test]
    fn test_reduction_of_traceless_is_identity() {
        // reducing an already traceless tensor must keep it unchanged
        let full = Multipole::from_outer(Vector::new(0.3, -0.8, 0.5), 3, 2.0);
        let reduced_once = full.reduced();
        let reduced_twice = reduced_once.to_full().reduced();
        for (slot, idx) in reduced_canonical(3).iter().enumerate() {
            let _ = slot;
            assert!((reduced_once.at(*idx) - reduced_twice.at(*idx)).abs() < 1e-12);
        }
    }

    #[test]
    fn test_tetrahedron_monopole_and_quadrupole() {
        let positions = tetrahedron();
        let masses = vec![1.0; 4];
        let expansion = MultipoleExpansion::from_points(&positions, &masses, Vector::zero(), 2);
        assert!((expansion.total_mass() - 4.0).abs() < 1e-12);
        // the regular tetrahedron has no quadrupole moment
        assert!(expansion.order(2).norm_sqr().sqrt() < 1e-12);
    }

    #[test]
    fn test_parallel_axis_round_trip() {
        let positions: Vec<Vector> = (0..8)
            .map(|i| {
                let t = i as f64 + 0.5;
                Vector::new((0.9 * t).sin(), (1.7 * t).cos(), (0.3 * t).sin())
            })
            .collect();
        let masses: Vec<f64> = (0..8).map(|i| 1.0 + 0.1 * i as f64).collect();
        let expansion = MultipoleExpansion::from_points(&positions, &masses, Vector::zero(), 4);
        let d = Vector::new(0.7, -1.1, 0.4);
        let round_trip = expansion.shifted(d, 4).shifted(-d, 4);
        for order in 0..=4 {
            for idx in reduced_canonical(order) {
                assert!(
                    (round_trip.order(order).at(*idx) - expansion.order(order).at(*idx)).abs()
                        < 1e-10,
                    "order {} mismatch",
                    order
                );
            }
        }
    }

    #[test]
    fn test_shift_matches_recomputation() {
        // shifting the expansion must equal the moments computed about
        // the shifted centre directly
        let positions: Vec<Vector> = (0..6)
            .map(|i| {
                let t = i as f64;
                Vector::new((1.1 * t).cos(), (0.6 * t).sin(), 0.2 * t - 0.5)
            })
            .collect();
        let masses = vec![0.5; 6];
        let expansion = MultipoleExpansion::from_points(&positions, &masses, Vector::zero(), 4);
        let d = Vector::new(0.25, 0.5, -0.75);
        let shifted = expansion.shifted(d, 4);
        let direct = MultipoleExpansion::from_points(&positions, &masses, d, 4);
        for order in 0..=4 {
            for idx in reduced_canonical(order) {
                assert!(
                    (shifted.order(order).at(*idx) - direct.order(order).at(*idx)).abs() < 1e-10,
                    "order {} mismatch",
                    order
                );
            }
        }
    }

    #[test]
    fn test_monopole_acceleration_matches_point_mass() {
        let expansion = MultipoleExpansion::from_points(
            &[Vector::zero()],
            &[3.0],
            Vector::zero(),
            0,
        );
        let field_point = Vector::new(2.0, 0.0, 0.0);
        let dr = Vector::zero() - field_point;
        let acc = expansion.evaluate_acceleration(dr, 0);
        // a = m * dr / |dr|^3, pointing towards the mass
        let expected = dr * (3.0 / length(dr).powi(3));
        assert!((acc[0] - expected[0]).abs() < 1e-12);
        assert!(acc[1].abs() < 1e-15 && acc[2].abs() < 1e-15);
    }

    #[test]
    fn test_expansion_converges_to_direct_sum() {
        // two point masses evaluated far away: higher orders must
        // shrink the error of the expansion
        let positions = vec![Vector::new(0.5, 0.1, -0.2), Vector::new(-0.4, -0.3, 0.25)];
        let masses = vec![2.0, 1.0];
        let com = {
            let total = masses[0] + masses[1];
            (positions[0] * masses[0] + positions[1] * masses[1]) / total
        };
        let expansion = MultipoleExpansion::from_points(&positions, &masses, com, 4);

        let field_point = Vector::new(6.0, -4.0, 3.0);
        let mut direct = Vector::zero();
        for (r, &m) in positions.iter().zip(&masses) {
            let dr = *r - field_point;
            direct += dr * (m / sqr_length(dr).powf(1.5));
        }

        let mut previous_error = f64::INFINITY;
        for order in [0usize, 2, 3, 4] {
            let acc = expansion.evaluate_acceleration(com - field_point, order);
            let error = length(acc - direct);
            assert!(
                error < previous_error * 1.01,
                "error did not shrink at order {}: {} vs {}",
                order,
                error,
                previous_error
            );
            previous_error = error;
        }
        assert!(previous_error < 1e-6);
    }
}
