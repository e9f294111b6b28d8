// ─────────────────────────────────────────────────────────────────────
// SCPN Impact Core — Property-Based Tests (proptest) for impact-math
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Property-based tests for impact-math using proptest.
//!
//! Covers: traceless multipole reduction, the parallel-axis theorem,
//! symmetric-tensor eigenvalues, traceless-tensor reconstruction, and
//! interval clamping.

use impact_math::multipole::{Multipole, MultipoleExpansion, TracelessMultipole};
use impact_math::tensor::{SymmetricTensor, TracelessTensor};
use impact_math::vector::{dot, Vector, X, Y, Z};
use impact_math::Interval;
use proptest::prelude::*;

fn small_f64() -> impl Strategy<Value = f64> {
    -5.0..5.0_f64
}

fn vector() -> impl Strategy<Value = Vector> {
    (small_f64(), small_f64(), small_f64()).prop_map(|(x, y, z)| Vector::new(x, y, z))
}

fn max_trace(q: &TracelessMultipole) -> f64 {
    if q.order() < 2 {
        return 0.0;
    }
    let trace = q.to_full().trace();
    let mut worst = 0.0_f64;
    // probe every component of the contracted tensor
    let probes: &[[u8; 4]] = &[
        [0, 0, 0, 0],
        [0, 1, 0, 0],
        [0, 2, 0, 0],
        [1, 1, 0, 0],
        [1, 2, 0, 0],
        [2, 2, 0, 0],
    ];
    for idx in probes.iter().take(if q.order() == 2 { 1 } else { 6 }) {
        worst = worst.max(trace.at(*idx).abs());
    }
    worst
}

proptest! {
    /// For every order 1..4 and random point cloud, the reduced
    /// multipole has vanishing trace.
    #[test]
    fn reduced_multipole_is_traceless(
        points in prop::collection::vec((vector(), 0.1..4.0_f64), 2..10),
        order in 1usize..=4,
    ) {
        let mut full = Multipole::zero(order);
        for (r, m) in &points {
            full.add_assign(&Multipole::from_outer(*r, order, *m));
        }
        let reduced = full.reduced();
        let scale = 1.0 + points.iter().map(|(r, m)| {
            m * dot(*r, *r).powf(order as f64 / 2.0)
        }).sum::<f64>();
        prop_assert!(max_trace(&reduced) < 1e-12 * scale,
            "trace = {} at order {}", max_trace(&reduced), order);
    }

    /// Shifting an expansion to r2 and back to r1 is the identity.
    #[test]
    fn parallel_axis_round_trip(
        points in prop::collection::vec((vector(), 0.1..4.0_f64), 2..10),
        d in vector(),
    ) {
        let positions: Vec<Vector> = points.iter().map(|(r, _)| *r).collect();
        let masses: Vec<f64> = points.iter().map(|(_, m)| *m).collect();
        let expansion =
            MultipoleExpansion::from_points(&positions, &masses, Vector::zero(), 4);
        let round_trip = expansion.shifted(d, 4).shifted(-d, 4);

        let mass: f64 = masses.iter().sum();
        let extent = positions
            .iter()
            .map(|r| dot(*r, *r).sqrt())
            .fold(0.0_f64, f64::max)
            + dot(d, d).sqrt();
        let scale = 1.0 + mass * (1.0 + extent).powi(4);
        for order in 0..=4usize {
            let difference = {
                let mut worst = 0.0_f64;
                let a = round_trip.order(order).to_full();
                let b = expansion.order(order).to_full();
                for i in 0..3u8 {
                    for j in 0..3u8 {
                        let idx = [i, j, i.min(j), j.max(i)];
                        worst = worst.max((a.at(idx) - b.at(idx)).abs());
                    }
                }
                worst
            };
            prop_assert!(difference < 1e-10 * scale,
                "order {} differs by {}", order, difference);
        }
    }

    /// Eigenvalues reproduce the three invariants.
    #[test]
    fn eigenvalues_match_invariants(diag in vector(), off in vector()) {
        let t = SymmetricTensor::new(diag, off);
        let [e1, e2, e3] = t.eigenvalues();
        let scale = 1.0 + e1.abs() + e2.abs() + e3.abs();
        prop_assert!((e1 + e2 + e3 - t.invariant_1()).abs() < 1e-8 * scale);
        prop_assert!(
            (e1 * e2 + e1 * e3 + e2 * e3 - t.invariant_2()).abs() < 1e-7 * scale * scale);
        prop_assert!((e1 * e2 * e3 - t.invariant_3()).abs() < 1e-7 * scale * scale * scale);
        prop_assert!(e1 >= e2 && e2 >= e3);
    }

    /// Converting a symmetric tensor to traceless and back subtracts
    /// exactly the isotropic part.
    #[test]
    fn traceless_reconstruction(diag in vector(), off in vector()) {
        let t = SymmetricTensor::new(diag, off);
        let traceless = TracelessTensor::from_symmetric(&t);
        prop_assert!(traceless.to_symmetric().trace().abs() < 1e-12
            * (1.0 + t.trace().abs()));
        let difference = t - traceless.to_symmetric();
        let third = t.trace() / 3.0;
        for axis in [X, Y, Z] {
            prop_assert!((difference.diagonal()[axis] - third).abs() < 1e-12
                * (1.0 + third.abs()));
        }
    }

    /// Clamping always lands inside the interval.
    #[test]
    fn interval_clamp_contains(lower in -10.0..0.0_f64, size in 0.0..10.0_f64,
                               value in -100.0..100.0_f64) {
        let interval = Interval::new(lower, lower + size);
        prop_assert!(interval.contains(interval.clamp(value)));
    }
}
