// ─────────────────────────────────────────────────────────────────────
// SCPN Impact Core — Particle Storage
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Typed, order-tagged particle quantities with multi-material
//! partitioning and structural mutation.
//!
//! Every quantity in a storage has the same particle count at all
//! times; operations that change the count (remove, duplicate, merge)
//! apply to every quantity atomically and notify the registered user
//! data and dependent storages. Position is a second-order vector
//! quantity whose fourth lane carries the smoothing length, so h is
//! integrated as an ordinary component.

use crate::material::Material;
use impact_math::{SymmetricTensor, TracelessTensor, Vector};
use impact_types::error::{ImpactError, ImpactResult};
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::{Arc, Mutex, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QuantityId {
    Position,
    Mass,
    Density,
    Pressure,
    Energy,
    SoundSpeed,
    DeviatoricStress,
    Damage,
    Flag,
    MaterialId,
    PersistentIndex,
    VelocityDivergence,
    VelocityGradient,
    VelocityRotation,
    StressReducing,
    EpsMin,
    WeibullExponent,
    FlawCount,
    ExplicitGrowth,
    AngularMomentumCorrection,
    XsphVelocity,
    MomentOfInertia,
    AngularVelocity,
}

impl QuantityId {
    pub fn name(&self) -> &'static str {
        match self {
            QuantityId::Position => "position",
            QuantityId::Mass => "mass",
            QuantityId::Density => "density",
            QuantityId::Pressure => "pressure",
            QuantityId::Energy => "energy",
            QuantityId::SoundSpeed => "sound speed",
            QuantityId::DeviatoricStress => "deviatoric stress",
            QuantityId::Damage => "damage",
            QuantityId::Flag => "flag",
            QuantityId::MaterialId => "material id",
            QuantityId::PersistentIndex => "persistent index",
            QuantityId::VelocityDivergence => "velocity divergence",
            QuantityId::VelocityGradient => "velocity gradient",
            QuantityId::VelocityRotation => "velocity rotation",
            QuantityId::StressReducing => "stress reducing",
            QuantityId::EpsMin => "activation strain",
            QuantityId::WeibullExponent => "weibull exponent",
            QuantityId::FlawCount => "flaw count",
            QuantityId::ExplicitGrowth => "explicit growth",
            QuantityId::AngularMomentumCorrection => "angular momentum correction",
            QuantityId::XsphVelocity => "xsph velocity",
            QuantityId::MomentOfInertia => "moment of inertia",
            QuantityId::AngularVelocity => "angular velocity",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderEnum {
    Zero,
    First,
    Second,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueEnum {
    Scalar,
    Vector,
    SymmetricTensor,
    TracelessTensor,
    Index,
}

#[derive(Debug, Clone, Default)]
pub struct QuantityBuffers<T> {
    pub values: Vec<T>,
    pub dt: Vec<T>,
    pub d2t: Vec<T>,
}

impl<T: Clone + Default> QuantityBuffers<T> {
    fn new(order: OrderEnum, values: Vec<T>) -> Self {
        let n = values.len();
        QuantityBuffers {
            values,
            dt: match order {
                OrderEnum::Zero => Vec::new(),
                _ => vec![T::default(); n],
            },
            d2t: match order {
                OrderEnum::Second => vec![T::default(); n],
                _ => Vec::new(),
            },
        }
    }

    fn remove(&mut self, sorted_idxs: &[usize]) {
        remove_rows(&mut self.values, sorted_idxs);
        remove_rows(&mut self.dt, sorted_idxs);
        remove_rows(&mut self.d2t, sorted_idxs);
    }

    fn duplicate(&mut self, idxs: &[usize]) {
        for &i in idxs {
            let value = self.values[i].clone();
            self.values.push(value);
            if !self.dt.is_empty() {
                let dt = self.dt[i].clone();
                self.dt.push(dt);
            }
            if !self.d2t.is_empty() {
                let d2t = self.d2t[i].clone();
                self.d2t.push(d2t);
            }
        }
    }

    fn merge(&mut self, other: QuantityBuffers<T>) {
        self.values.extend(other.values);
        self.dt.extend(other.dt);
        self.d2t.extend(other.d2t);
    }
}

fn remove_rows<T>(buffer: &mut Vec<T>, sorted_idxs: &[usize]) {
    if buffer.is_empty() || sorted_idxs.is_empty() {
        return;
    }
    let mut removal = sorted_idxs.iter().peekable();
    let mut write = 0;
    for read in 0..buffer.len() {
        if removal.peek() == Some(&&read) {
            removal.next();
            continue;
        }
        if write != read {
            buffer.swap(write, read);
        }
        write += 1;
    }
    buffer.truncate(write);
}

#[derive(Debug, Clone)]
pub enum QuantityData {
    Scalar(QuantityBuffers<f64>),
    Vector(QuantityBuffers<Vector>),
    SymmetricTensor(QuantityBuffers<SymmetricTensor>),
    TracelessTensor(QuantityBuffers<TracelessTensor>),
    Index(QuantityBuffers<u64>),
}

macro_rules! for_each_data {
    ($data:expr, $buffers:ident => $body:expr) => {
        match $data {
            QuantityData::Scalar($buffers) => $body,
            QuantityData::Vector($buffers) => $body,
            QuantityData::SymmetricTensor($buffers) => $body,
            QuantityData::TracelessTensor($buffers) => $body,
            QuantityData::Index($buffers) => $body,
        }
    };
}

#[derive(Debug, Clone)]
pub struct Quantity {
    order: OrderEnum,
    data: QuantityData,
}

impl Quantity {
    pub fn order(&self) -> OrderEnum {
        self.order
    }

    pub fn value_enum(&self) -> ValueEnum {
        match &self.data {
            QuantityData::Scalar(_) => ValueEnum::Scalar,
            QuantityData::Vector(_) => ValueEnum::Vector,
            QuantityData::SymmetricTensor(_) => ValueEnum::SymmetricTensor,
            QuantityData::TracelessTensor(_) => ValueEnum::TracelessTensor,
            QuantityData::Index(_) => ValueEnum::Index,
        }
    }

    pub fn len(&self) -> usize {
        for_each_data!(&self.data, buffers => buffers.values.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn data(&self) -> &QuantityData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut QuantityData {
        &mut self.data
    }

    /// Zero the highest derivative, called at the start of each step.
    pub fn clear_highest_derivative(&mut self) {
        let order = self.order;
        for_each_data!(&mut self.data, buffers => {
            match order {
                OrderEnum::Zero => {}
                OrderEnum::First => buffers.dt.iter_mut().for_each(|v| *v = Default::default()),
                OrderEnum::Second => buffers.d2t.iter_mut().for_each(|v| *v = Default::default()),
            }
        });
    }

    fn remove(&mut self, sorted_idxs: &[usize]) {
        for_each_data!(&mut self.data, buffers => buffers.remove(sorted_idxs));
    }

    fn duplicate(&mut self, idxs: &[usize]) {
        for_each_data!(&mut self.data, buffers => buffers.duplicate(idxs));
    }
}

/// Typed access into the storage quantities.
pub trait QuantityValue: Clone + Default + 'static {
    const VALUE_ENUM: ValueEnum;

    fn buffers(quantity: &Quantity) -> Option<&QuantityBuffers<Self>>;
    fn buffers_mut(quantity: &mut Quantity) -> Option<&mut QuantityBuffers<Self>>;
    fn wrap(buffers: QuantityBuffers<Self>) -> QuantityData;
}

macro_rules! impl_quantity_value {
    ($type:ty, $variant:ident) => {
        impl QuantityValue for $type {
            const VALUE_ENUM: ValueEnum = ValueEnum::$variant;

            fn buffers(quantity: &Quantity) -> Option<&QuantityBuffers<Self>> {
                match &quantity.data {
                    QuantityData::$variant(buffers) => Some(buffers),
                    _ => None,
                }
            }

            fn buffers_mut(quantity: &mut Quantity) -> Option<&mut QuantityBuffers<Self>> {
                match &mut quantity.data {
                    QuantityData::$variant(buffers) => Some(buffers),
                    _ => None,
                }
            }

            fn wrap(buffers: QuantityBuffers<Self>) -> QuantityData {
                QuantityData::$variant(buffers)
            }
        }
    };
}

impl_quantity_value!(f64, Scalar);
impl_quantity_value!(Vector, Vector);
impl_quantity_value!(SymmetricTensor, SymmetricTensor);
impl_quantity_value!(TracelessTensor, TracelessTensor);
impl_quantity_value!(u64, Index);

/// Massive point body coupled to particles only through gravity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attractor {
    pub position: Vector,
    pub velocity: Vector,
    pub radius: f64,
    pub mass: f64,
    /// Gravitational acceleration accumulated by the evaluator.
    pub acceleration: Vector,
}

impl Attractor {
    pub fn new(position: Vector, velocity: Vector, radius: f64, mass: f64) -> Self {
        Attractor {
            position,
            velocity,
            radius,
            mass,
            acceleration: Vector::zero(),
        }
    }
}

/// Auxiliary per-particle state owned by the storage; `remove` is
/// invoked on every structural removal so that dependent indices stay
/// consistent.
pub trait StorageUserData: Send {
    fn remove(&mut self, sorted_idxs: &[usize]);
    fn as_any(&self) -> &dyn std::any::Any;
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}

// remove() behaviour switches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RemoveFlags {
    /// Indices are already sorted ascending and unique.
    pub sorted: bool,
    /// Mirror the removal into registered dependent storages.
    pub propagate: bool,
}

impl RemoveFlags {
    pub fn sorted() -> Self {
        RemoveFlags {
            sorted: true,
            propagate: false,
        }
    }

    pub fn propagate() -> Self {
        RemoveFlags {
            sorted: false,
            propagate: true,
        }
    }

    pub fn sorted_propagate() -> Self {
        RemoveFlags {
            sorted: true,
            propagate: true,
        }
    }
}

struct MaterialSlot {
    range: Range<usize>,
    material: Option<Material>,
}

/// Serialisation hook: the core exposes buffers, an external
/// collaborator owns the format.
pub trait StorageVisitor {
    fn visit_scalar(&mut self, id: QuantityId, order: OrderEnum, buffers: &QuantityBuffers<f64>);
    fn visit_vector(&mut self, id: QuantityId, order: OrderEnum, buffers: &QuantityBuffers<Vector>);
    fn visit_symmetric_tensor(
        &mut self,
        id: QuantityId,
        order: OrderEnum,
        buffers: &QuantityBuffers<SymmetricTensor>,
    );
    fn visit_traceless_tensor(
        &mut self,
        id: QuantityId,
        order: OrderEnum,
        buffers: &QuantityBuffers<TracelessTensor>,
    );
    fn visit_index(&mut self, id: QuantityId, order: OrderEnum, buffers: &QuantityBuffers<u64>);
}

#[derive(Default)]
pub struct Storage {
    quantities: BTreeMap<QuantityId, Quantity>,
    materials: Vec<MaterialSlot>,
    attractors: Vec<Attractor>,
    user_data: Option<Box<dyn StorageUserData>>,
    dependents: Vec<Weak<Mutex<Storage>>>,
}

impl Storage {
    pub fn new() -> Self {
        Storage::default()
    }

    /// Storage with a single material covering all particles inserted
    /// later.
    pub fn with_material(material: Material) -> Self {
        let mut storage = Storage::new();
        storage.materials.push(MaterialSlot {
            range: 0..0,
            material: Some(material),
        });
        storage
    }

    pub fn particle_count(&self) -> usize {
        self.quantities
            .values()
            .next()
            .map(|q| q.len())
            .unwrap_or(0)
    }

    pub fn quantity_count(&self) -> usize {
        self.quantities.len()
    }

    pub fn has(&self, id: QuantityId) -> bool {
        self.quantities.contains_key(&id)
    }

    pub fn ids(&self) -> Vec<QuantityId> {
        self.quantities.keys().copied().collect()
    }

    pub fn quantity(&self, id: QuantityId) -> ImpactResult<&Quantity> {
        self.quantities.get(&id).ok_or_else(|| {
            ImpactError::invalid_setup(format!("quantity '{}' is not stored", id.name()))
        })
    }

    pub fn quantity_mut(&mut self, id: QuantityId) -> ImpactResult<&mut Quantity> {
        self.quantities.get_mut(&id).ok_or_else(|| {
            ImpactError::invalid_setup(format!("quantity '{}' is not stored", id.name()))
        })
    }

    /// Optional lookup, as opposed to the erroring `quantity`.
    pub fn try_quantity(&self, id: QuantityId) -> Option<&Quantity> {
        self.quantities.get(&id)
    }

    /// Create a quantity from an array of values; the first quantity
    /// inserted sets the particle count.
    pub fn insert<T: QuantityValue>(
        &mut self,
        id: QuantityId,
        order: OrderEnum,
        values: Vec<T>,
    ) -> ImpactResult<()> {
        if !self.quantities.is_empty() && values.len() != self.particle_count() {
            return Err(ImpactError::invalid_setup(format!(
                "quantity '{}' has {} values, the storage holds {} particles",
                id.name(),
                values.len(),
                self.particle_count()
            )));
        }
        if let Some(existing) = self.quantities.get(&id) {
            if existing.value_enum() != T::VALUE_ENUM {
                return Err(ImpactError::invalid_setup(format!(
                    "quantity '{}' already stored with a different value type",
                    id.name()
                )));
            }
        }
        self.quantities.insert(
            id,
            Quantity {
                order,
                data: T::wrap(QuantityBuffers::new(order, values)),
            },
        );
        if self.quantities.len() == 1 && !self.materials.is_empty() {
            // the first quantity defines N; materials cover it
            let n = self.particle_count();
            if self.materials.len() == 1 {
                self.materials[0].range = 0..n;
            }
        }
        Ok(())
    }

    /// Create a quantity filled with a single default value.
    pub fn insert_uniform<T: QuantityValue>(
        &mut self,
        id: QuantityId,
        order: OrderEnum,
        value: T,
    ) -> ImpactResult<()> {
        let n = self.particle_count();
        if n == 0 {
            return Err(ImpactError::invalid_setup(format!(
                "cannot insert '{}' into an empty storage",
                id.name()
            )));
        }
        self.insert(id, order, vec![value; n])
    }

    fn typed<T: QuantityValue>(&self, id: QuantityId) -> ImpactResult<&QuantityBuffers<T>> {
        let quantity = self.quantity(id)?;
        T::buffers(quantity).ok_or_else(|| {
            ImpactError::invalid_setup(format!(
                "quantity '{}' stored as {:?}, requested a different type",
                id.name(),
                quantity.value_enum()
            ))
        })
    }

    fn typed_mut<T: QuantityValue>(
        &mut self,
        id: QuantityId,
    ) -> ImpactResult<&mut QuantityBuffers<T>> {
        let quantity = self.quantity_mut(id)?;
        let value_enum = quantity.value_enum();
        T::buffers_mut(quantity).ok_or_else(|| {
            ImpactError::invalid_setup(format!(
                "quantity '{}' stored as {:?}, requested a different type",
                id.name(),
                value_enum
            ))
        })
    }

    pub fn value<T: QuantityValue>(&self, id: QuantityId) -> ImpactResult<&[T]> {
        Ok(&self.typed::<T>(id)?.values)
    }

    pub fn value_mut<T: QuantityValue>(&mut self, id: QuantityId) -> ImpactResult<&mut [T]> {
        Ok(&mut self.typed_mut::<T>(id)?.values)
    }

    pub fn dt<T: QuantityValue>(&self, id: QuantityId) -> ImpactResult<&[T]> {
        Ok(&self.typed::<T>(id)?.dt)
    }

    pub fn dt_mut<T: QuantityValue>(&mut self, id: QuantityId) -> ImpactResult<&mut [T]> {
        Ok(&mut self.typed_mut::<T>(id)?.dt)
    }

    pub fn d2t<T: QuantityValue>(&self, id: QuantityId) -> ImpactResult<&[T]> {
        Ok(&self.typed::<T>(id)?.d2t)
    }

    pub fn d2t_mut<T: QuantityValue>(&mut self, id: QuantityId) -> ImpactResult<&mut [T]> {
        Ok(&mut self.typed_mut::<T>(id)?.d2t)
    }

    /// All buffers of one quantity at once.
    pub fn all_buffers_mut<T: QuantityValue>(
        &mut self,
        id: QuantityId,
    ) -> ImpactResult<(&mut [T], &mut [T], &mut [T])> {
        let buffers = self.typed_mut::<T>(id)?;
        Ok((
            &mut buffers.values,
            &mut buffers.dt,
            &mut buffers.d2t,
        ))
    }

    /// Distinct quantities borrowed mutably at once; ids must be unique
    /// and present.
    pub fn get_many_mut<const N: usize>(
        &mut self,
        ids: [QuantityId; N],
    ) -> ImpactResult<[&mut Quantity; N]> {
        for (slot, id) in ids.iter().enumerate() {
            if ids[..slot].contains(id) {
                return Err(ImpactError::invalid_setup(format!(
                    "duplicate quantity '{}' in joint borrow",
                    id.name()
                )));
            }
        }
        let mut found: Vec<(usize, &mut Quantity)> = self
            .quantities
            .iter_mut()
            .filter_map(|(key, quantity)| {
                ids.iter().position(|id| id == key).map(|pos| (pos, quantity))
            })
            .collect();
        if found.len() != N {
            return Err(ImpactError::invalid_setup(
                "joint borrow of quantities not all stored".to_string(),
            ));
        }
        found.sort_by_key(|(pos, _)| *pos);
        let quantities: Vec<&mut Quantity> = found.into_iter().map(|(_, q)| q).collect();
        quantities
            .try_into()
            .map_err(|_| ImpactError::invalid_setup("joint borrow failed".to_string()))
    }

    /// Zero all highest derivatives; the start of an integration step.
    pub fn init(&mut self) {
        for quantity in self.quantities.values_mut() {
            quantity.clear_highest_derivative();
        }
    }

    /// Zero the highest derivatives of the given particles only, used
    /// by the frozen-particles boundary.
    pub fn clear_highest_derivative_rows(&mut self, rows: &[usize]) {
        for quantity in self.quantities.values_mut() {
            let order = quantity.order;
            for_each_data!(&mut quantity.data, buffers => {
                let target = match order {
                    OrderEnum::Zero => continue,
                    OrderEnum::First => &mut buffers.dt,
                    OrderEnum::Second => &mut buffers.d2t,
                };
                for &row in rows {
                    target[row] = Default::default();
                }
            });
        }
    }

    // ── materials ────────────────────────────────────────────────────

    pub fn material_count(&self) -> usize {
        self.materials.len()
    }

    pub fn material_range(&self, index: usize) -> Range<usize> {
        self.materials[index].range.clone()
    }

    pub fn material(&self, index: usize) -> Option<&Material> {
        self.materials[index].material.as_ref()
    }

    /// Temporarily take a material out, so that it can operate on the
    /// storage without aliasing it. Must be paired with `put_material`.
    pub fn take_material(&mut self, index: usize) -> Option<Material> {
        self.materials[index].material.take()
    }

    pub fn put_material(&mut self, index: usize, material: Material) {
        debug_assert!(self.materials[index].material.is_none());
        self.materials[index].material = Some(material);
    }

    /// Material index of a particle, resolved through the partitions.
    pub fn material_of(&self, particle: usize) -> Option<usize> {
        self.materials
            .iter()
            .position(|slot| slot.range.contains(&particle))
    }

    // ── attractors ───────────────────────────────────────────────────

    pub fn attractors(&self) -> &[Attractor] {
        &self.attractors
    }

    pub fn attractors_mut(&mut self) -> &mut [Attractor] {
        &mut self.attractors
    }

    pub fn add_attractor(&mut self, attractor: Attractor) {
        self.attractors.push(attractor);
    }

    // ── user data & dependents ───────────────────────────────────────

    pub fn set_user_data(&mut self, data: Box<dyn StorageUserData>) {
        self.user_data = Some(data);
    }

    pub fn user_data_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.user_data
            .as_mut()
            .and_then(|data| data.as_any_mut().downcast_mut::<T>())
    }

    pub fn register_dependent(&mut self, dependent: &Arc<Mutex<Storage>>) {
        self.dependents.push(Arc::downgrade(dependent));
    }

    /// Invoke `action` on every registered dependent storage that is
    /// still alive.
    pub fn propagate(&mut self, mut action: impl FnMut(&mut Storage)) {
        self.dependents.retain(|weak| weak.upgrade().is_some());
        for weak in &self.dependents {
            if let Some(dependent) = weak.upgrade() {
                let mut guard = dependent.lock().expect("dependent storage poisoned");
                action(&mut guard);
            }
        }
    }

    // ── structural mutation ──────────────────────────────────────────

    /// Remove the given particles from every quantity. Out-of-range
    /// indices are a contract violation and panic.
    pub fn remove(&mut self, idxs: &[usize], flags: RemoveFlags) {
        if idxs.is_empty() {
            return;
        }
        let mut sorted;
        let sorted_idxs: &[usize] = if flags.sorted {
            idxs
        } else {
            sorted = idxs.to_vec();
            sorted.sort_unstable();
            sorted.dedup();
            &sorted
        };
        let n = self.particle_count();
        assert!(
            sorted_idxs.windows(2).all(|w| w[0] < w[1])
                && sorted_idxs.last().map(|&last| last < n).unwrap_or(true),
            "removal indices must be unique and in range"
        );

        for quantity in self.quantities.values_mut() {
            quantity.remove(sorted_idxs);
        }

        // shrink material partitions past the removed rows
        for slot in &mut self.materials {
            let removed_before = sorted_idxs.partition_point(|&i| i < slot.range.start);
            let removed_inside = sorted_idxs.partition_point(|&i| i < slot.range.end) - removed_before;
            slot.range = (slot.range.start - removed_before)
                ..(slot.range.end - removed_before - removed_inside);
        }

        if let Some(user_data) = &mut self.user_data {
            user_data.remove(sorted_idxs);
        }

        if flags.propagate {
            let idxs_copy: Vec<usize> = sorted_idxs.to_vec();
            self.propagate(|dependent| {
                let in_range: Vec<usize> = idxs_copy
                    .iter()
                    .copied()
                    .filter(|&i| i < dependent.particle_count())
                    .collect();
                dependent.remove(&in_range, RemoveFlags::sorted());
            });
        }
    }

    /// Append copies of the selected rows across every quantity,
    /// returning the new indices.
    pub fn duplicate(&mut self, idxs: &[usize]) -> Vec<usize> {
        let n = self.particle_count();
        assert!(idxs.iter().all(|&i| i < n), "duplicated index out of range");
        for quantity in self.quantities.values_mut() {
            quantity.duplicate(idxs);
        }
        (n..n + idxs.len()).collect()
    }

    /// Append another storage with an identical quantity layout.
    pub fn merge(&mut self, other: Storage) -> ImpactResult<()> {
        if self.quantities.is_empty() {
            *self = other;
            return Ok(());
        }
        if self.quantities.len() != other.quantities.len() {
            return Err(ImpactError::invalid_setup(
                "merged storages have different quantity sets".to_string(),
            ));
        }
        for (id, quantity) in &self.quantities {
            let theirs = other.quantity(*id)?;
            if theirs.value_enum() != quantity.value_enum() || theirs.order() != quantity.order() {
                return Err(ImpactError::invalid_setup(format!(
                    "merged quantity '{}' differs in type or order",
                    id.name()
                )));
            }
        }
        let offset = self.particle_count();
        let material_offset = self.materials.len() as u64;
        for (id, quantity) in other.quantities {
            let ours = self.quantities.get_mut(&id).expect("checked above");
            match (&mut ours.data, quantity.data) {
                (QuantityData::Scalar(a), QuantityData::Scalar(b)) => a.merge(b),
                (QuantityData::Vector(a), QuantityData::Vector(b)) => a.merge(b),
                (QuantityData::SymmetricTensor(a), QuantityData::SymmetricTensor(b)) => a.merge(b),
                (QuantityData::TracelessTensor(a), QuantityData::TracelessTensor(b)) => a.merge(b),
                (QuantityData::Index(a), QuantityData::Index(mut b)) => {
                    if id == QuantityId::MaterialId {
                        // material indices shift past our partitions
                        for value in b.values.iter_mut() {
                            *value += material_offset;
                        }
                    }
                    a.merge(b)
                }
                _ => unreachable!("layout checked above"),
            }
        }
        for slot in other.materials {
            self.materials.push(MaterialSlot {
                range: slot.range.start + offset..slot.range.end + offset,
                material: slot.material,
            });
        }
        self.attractors.extend(other.attractors);
        Ok(())
    }

    /// All quantities have the same particle count.
    pub fn is_valid(&self) -> bool {
        let n = self.particle_count();
        self.quantities.values().all(|quantity| {
            let order = quantity.order();
            for_each_data!(quantity.data(), buffers => {
                buffers.values.len() == n
                    && (order == OrderEnum::Zero || buffers.dt.len() == n)
                    && (order != OrderEnum::Second || buffers.d2t.len() == n)
            })
        })
    }

    /// Scan every buffer for non-finite values; the per-step validity
    /// check of the run loop.
    pub fn validate_finite(&self) -> ImpactResult<()> {
        for (id, quantity) in &self.quantities {
            let finite = match quantity.data() {
                QuantityData::Scalar(b) => buffers_finite(b, |v| v.is_finite()),
                QuantityData::Vector(b) => buffers_finite(b, |v| v.is_finite()),
                QuantityData::SymmetricTensor(b) => buffers_finite(b, |v| v.is_finite()),
                QuantityData::TracelessTensor(b) => buffers_finite(b, |v| v.is_finite()),
                QuantityData::Index(b) => buffers_finite(b, |_| true),
            };
            if !finite {
                return Err(ImpactError::numeric(
                    id.name(),
                    "buffer contains a non-finite value",
                ));
            }
        }
        Ok(())
    }

    pub fn visit(&self, visitor: &mut dyn StorageVisitor) {
        for (id, quantity) in &self.quantities {
            match quantity.data() {
                QuantityData::Scalar(b) => visitor.visit_scalar(*id, quantity.order(), b),
                QuantityData::Vector(b) => visitor.visit_vector(*id, quantity.order(), b),
                QuantityData::SymmetricTensor(b) => {
                    visitor.visit_symmetric_tensor(*id, quantity.order(), b)
                }
                QuantityData::TracelessTensor(b) => {
                    visitor.visit_traceless_tensor(*id, quantity.order(), b)
                }
                QuantityData::Index(b) => visitor.visit_index(*id, quantity.order(), b),
            }
        }
    }
}

fn buffers_finite<T>(buffers: &QuantityBuffers<T>, finite: impl Fn(&T) -> bool) -> bool {
    buffers.values.iter().all(&finite)
        && buffers.dt.iter().all(&finite)
        && buffers.d2t.iter().all(&finite)
}
