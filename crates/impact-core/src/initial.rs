// ─────────────────────────────────────────────────────────────────────
// SCPN Impact Core — Initial Conditions
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Body setup helpers used by tests and run scaffolding.

use crate::material::{Material, MaterialContext};
use crate::storage::{OrderEnum, QuantityId, Storage};
use impact_math::Vector;
use impact_types::error::ImpactResult;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, UnitBall};

/// A homogeneous sphere of particles with its material quantities,
/// flagged with the given body id. Positions are randomly sampled, the
/// smoothing length follows the mean particle spacing.
pub fn make_sphere_body(
    config: &impact_types::config::BodyConfig,
    radius: f64,
    center: Vector,
    seed: u64,
    body_flag: u64,
) -> ImpactResult<Storage> {
    let material = Material::from_config(config)?;
    let mut storage = Storage::with_material(material);

    let n = config.particle_count;
    let volume = 4.0 / 3.0 * std::f64::consts::PI * radius.powi(3);
    let spacing = (volume / n as f64).cbrt();
    let h = 1.2 * spacing;

    let mut rng = StdRng::seed_from_u64(seed);
    let positions: Vec<Vector> = (0..n)
        .map(|_| {
            let sample: [f64; 3] = UnitBall.sample(&mut rng);
            Vector::with_h(
                center[0] + sample[0] * radius,
                center[1] + sample[1] * radius,
                center[2] + sample[2] * radius,
                h,
            )
        })
        .collect();
    storage.insert(QuantityId::Position, OrderEnum::Second, positions)?;
    storage.insert_uniform(
        QuantityId::Mass,
        OrderEnum::Zero,
        config.density * volume / n as f64,
    )?;
    storage.insert_uniform(QuantityId::Flag, OrderEnum::Zero, body_flag)?;
    storage.insert_uniform(QuantityId::MaterialId, OrderEnum::Zero, 0_u64)?;
    storage.insert(
        QuantityId::PersistentIndex,
        OrderEnum::Zero,
        (0..n as u64).collect(),
    )?;

    let mut context = MaterialContext::new(seed, body_flag, 2.0);
    let material = storage.take_material(0).expect("material just created");
    let result = material.create(&mut storage, 0..n, &mut context);
    storage.put_material(0, material);
    result?;
    Ok(storage)
}

/// Give the whole body a uniform velocity.
pub fn set_body_velocity(storage: &mut Storage, velocity: Vector) -> ImpactResult<()> {
    let velocities = storage.dt_mut::<Vector>(QuantityId::Position)?;
    for slot in velocities.iter_mut() {
        let dh = slot.h();
        *slot = velocity.of_h(dh);
    }
    Ok(())
}
