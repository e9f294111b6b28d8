// ─────────────────────────────────────────────────────────────────────
// SCPN Impact Core — Property-Based Tests (proptest) for impact-core
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Property-based tests for the particle storage and the neighbour
//! finders.

use impact_core::finders::{BvhFinder, KdTree, SpatialFinder, UniformGridFinder};
use impact_core::scheduler::SequentialScheduler;
use impact_core::storage::{OrderEnum, QuantityId, RemoveFlags, Storage};
use impact_math::vector::{sqr_length, Vector};
use proptest::prelude::*;

fn point() -> impl Strategy<Value = Vector> {
    (-5.0..5.0_f64, -5.0..5.0_f64, -5.0..5.0_f64)
        .prop_map(|(x, y, z)| Vector::with_h(x, y, z, 0.1))
}

proptest! {
    /// Property 7: every finder variant returns the identical neighbour
    /// set for arbitrary clouds and radii.
    #[test]
    fn finders_agree(points in prop::collection::vec(point(), 1..150),
                     radius in 0.01..4.0_f64) {
        let scheduler = SequentialScheduler;
        let mut kd = KdTree::with_leaf_size(4);
        let mut grid = UniformGridFinder::new();
        let mut bvh = BvhFinder::new();
        kd.build(&scheduler, &points);
        grid.build(&scheduler, &points);
        bvh.build(&scheduler, &points);

        let mut records = Vec::new();
        for i in 0..points.len().min(20) {
            let expected: Vec<usize> = {
                let mut found: Vec<usize> = points
                    .iter()
                    .enumerate()
                    .filter(|(_, p)| sqr_length(**p - points[i]) <= radius * radius)
                    .map(|(index, _)| index)
                    .collect();
                found.sort_unstable();
                found
            };
            for finder in [&kd as &dyn SpatialFinder, &grid, &bvh] {
                records.clear();
                finder.find_all(i, radius, &mut records);
                let mut got: Vec<usize> = records.iter().map(|r| r.index).collect();
                got.sort_unstable();
                prop_assert_eq!(&got, &expected);
            }
        }
    }

    /// Property 9: removing rows and merging them back leaves every
    /// surviving row bit-identical, up to row order.
    #[test]
    fn storage_remove_reinsert_round_trip(
        values in prop::collection::vec((-1.0e6..1.0e6_f64, point()), 2..60),
        removal_seed in 0u64..1000,
    ) {
        let n = values.len();
        let mut storage = Storage::new();
        storage
            .insert(
                QuantityId::Position,
                OrderEnum::Second,
                values.iter().map(|(_, r)| *r).collect(),
            )
            .unwrap();
        storage
            .insert(
                QuantityId::Density,
                OrderEnum::First,
                values.iter().map(|(d, _)| *d).collect(),
            )
            .unwrap();
        storage
            .insert(
                QuantityId::PersistentIndex,
                OrderEnum::Zero,
                (0..n as u64).collect(),
            )
            .unwrap();

        // pseudo-random removal subset, at least one survivor
        let removed: Vec<usize> = (0..n)
            .filter(|i| (i * 7919 + removal_seed as usize) % 3 == 0 && *i != 0)
            .collect();
        let kept: Vec<usize> = (0..n).filter(|i| !removed.contains(i)).collect();
        let removed_rows: Vec<(f64, Vector, u64)> = removed
            .iter()
            .map(|&i| (values[i].0, values[i].1, i as u64))
            .collect();

        storage.remove(&removed, RemoveFlags::sorted());
        prop_assert_eq!(storage.particle_count(), kept.len());

        let mut other = Storage::new();
        other
            .insert(
                QuantityId::Position,
                OrderEnum::Second,
                removed_rows.iter().map(|(_, r, _)| *r).collect(),
            )
            .unwrap();
        other
            .insert(
                QuantityId::Density,
                OrderEnum::First,
                removed_rows.iter().map(|(d, _, _)| *d).collect(),
            )
            .unwrap();
        other
            .insert(
                QuantityId::PersistentIndex,
                OrderEnum::Zero,
                removed_rows.iter().map(|(_, _, p)| *p).collect(),
            )
            .unwrap();
        if !removed.is_empty() {
            storage.merge(other).unwrap();
        }

        prop_assert_eq!(storage.particle_count(), n);
        // every original row is present somewhere, bit-identical
        let index = storage.value::<u64>(QuantityId::PersistentIndex).unwrap();
        let density = storage.value::<f64>(QuantityId::Density).unwrap();
        let positions = storage.value::<Vector>(QuantityId::Position).unwrap();
        for row in 0..n {
            let original = index[row] as usize;
            prop_assert_eq!(density[row], values[original].0);
            prop_assert_eq!(positions[row], values[original].1);
        }
    }

    /// Duplication appends exact copies and leaves originals untouched.
    #[test]
    fn storage_duplicate_appends_copies(
        count in 2usize..40,
        pick in 0usize..40,
    ) {
        let pick = pick % count;
        let mut storage = Storage::new();
        let positions: Vec<Vector> = (0..count)
            .map(|i| Vector::with_h(i as f64, 2.0 * i as f64, 0.0, 0.3))
            .collect();
        storage
            .insert(QuantityId::Position, OrderEnum::Second, positions.clone())
            .unwrap();
        let new_rows = storage.duplicate(&[pick]);
        prop_assert_eq!(new_rows.len(), 1);
        let stored = storage.value::<Vector>(QuantityId::Position).unwrap();
        prop_assert_eq!(stored[new_rows[0]], positions[pick]);
        prop_assert_eq!(&stored[..count], &positions[..]);
    }
}
