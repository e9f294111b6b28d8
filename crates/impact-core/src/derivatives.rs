// ─────────────────────────────────────────────────────────────────────
// SCPN Impact Core — Derivative Pipeline
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Accumulation of pairwise contributions into per-particle buffers.
//!
//! Each equation term registers derivatives into the holder. A
//! derivative declares its output buffers (`create`), a phase, and a
//! symmetry: symmetric derivatives write both sides of a pair (visited
//! once thanks to the rank filter), asymmetric derivatives write only
//! particle i (visited from both sides). If any registered derivative
//! is asymmetric the whole loop runs asymmetrically. Buffers are
//! per-thread; the reduction sums them in thread-index order, then
//! flushes into the storage as the highest derivative of the target
//! quantity.

use crate::storage::{OrderEnum, QuantityId, Storage};
use impact_math::{SymmetricTensor, TracelessTensor, Vector};
use impact_types::error::{ImpactError, ImpactResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Runs fully before any evaluation derivative sees its inputs.
    Precomputation,
    Evaluation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symmetry {
    Symmetric,
    Asymmetric,
}

/// Declared ownership of an output buffer. Two derivatives may write
/// the same buffer only when both mark it shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferSource {
    Unique,
    Shared,
}

#[derive(Debug, Clone)]
enum AccBuffer {
    Scalar(Vec<f64>),
    Vector(Vec<Vector>),
    SymmetricTensor(Vec<SymmetricTensor>),
    TracelessTensor(Vec<TracelessTensor>),
}

impl AccBuffer {
    fn resize_zeroed(&mut self, size: usize) {
        match self {
            AccBuffer::Scalar(buffer) => {
                buffer.clear();
                buffer.resize(size, 0.0);
            }
            AccBuffer::Vector(buffer) => {
                buffer.clear();
                buffer.resize(size, Vector::zero());
            }
            AccBuffer::SymmetricTensor(buffer) => {
                buffer.clear();
                buffer.resize(size, SymmetricTensor::null());
            }
            AccBuffer::TracelessTensor(buffer) => {
                buffer.clear();
                buffer.resize(size, TracelessTensor::null());
            }
        }
    }

    fn add_from(&mut self, other: &AccBuffer) {
        match (self, other) {
            (AccBuffer::Scalar(a), AccBuffer::Scalar(b)) => {
                for (x, y) in a.iter_mut().zip(b) {
                    *x += *y;
                }
            }
            (AccBuffer::Vector(a), AccBuffer::Vector(b)) => {
                for (x, y) in a.iter_mut().zip(b) {
                    *x += *y;
                }
            }
            (AccBuffer::SymmetricTensor(a), AccBuffer::SymmetricTensor(b)) => {
                for (x, y) in a.iter_mut().zip(b) {
                    *x += *y;
                }
            }
            (AccBuffer::TracelessTensor(a), AccBuffer::TracelessTensor(b)) => {
                for (x, y) in a.iter_mut().zip(b) {
                    *x += *y;
                }
            }
            _ => unreachable!("buffer layouts diverged"),
        }
    }
}

#[derive(Debug, Clone)]
struct Element {
    id: QuantityId,
    phase: Phase,
    buffer: AccBuffer,
}

/// Thread-local accumulation storage; one per worker thread.
#[derive(Debug, Clone, Default)]
pub struct Accumulated {
    elements: Vec<Element>,
}

macro_rules! accumulated_accessors {
    ($insert:ident, $get:ident, $variant:ident, $type:ty) => {
        pub fn $insert(
            &mut self,
            id: QuantityId,
            phase: Phase,
            source: BufferSource,
        ) -> ImpactResult<()> {
            if self.elements.iter().any(|element| element.id == id) {
                return match source {
                    BufferSource::Shared => Ok(()),
                    BufferSource::Unique => Err(ImpactError::invalid_setup(format!(
                        "buffer '{}' already declared by another derivative; mark it shared",
                        id.name()
                    ))),
                };
            }
            self.elements.push(Element {
                id,
                phase,
                buffer: AccBuffer::$variant(Vec::new()),
            });
            Ok(())
        }

        pub fn $get(&mut self, id: QuantityId) -> &mut Vec<$type> {
            for element in &mut self.elements {
                if element.id == id {
                    match &mut element.buffer {
                        AccBuffer::$variant(buffer) => return buffer,
                        _ => panic!("buffer '{}' has a different value type", id.name()),
                    }
                }
            }
            panic!("buffer '{}' was never declared", id.name());
        }
    };
}

impl Accumulated {
    accumulated_accessors!(insert_scalar, scalar_mut, Scalar, f64);
    accumulated_accessors!(insert_vector, vector_mut, Vector, Vector);
    accumulated_accessors!(
        insert_symmetric_tensor,
        symmetric_tensor_mut,
        SymmetricTensor,
        SymmetricTensor
    );
    accumulated_accessors!(
        insert_traceless_tensor,
        traceless_tensor_mut,
        TracelessTensor,
        TracelessTensor
    );

    pub fn buffer_count(&self) -> usize {
        self.elements.len()
    }

    /// Resize every buffer to the particle count and zero it.
    pub fn initialize(&mut self, size: usize) {
        for element in &mut self.elements {
            element.buffer.resize_zeroed(size);
        }
    }

    /// Sum the matching buffers of `others` into self, in slot order.
    pub fn sum(&mut self, others: &[Accumulated]) {
        for other in others {
            debug_assert!(other.elements.len() == self.elements.len());
            for (mine, theirs) in self.elements.iter_mut().zip(&other.elements) {
                debug_assert!(mine.id == theirs.id);
                mine.buffer.add_from(&theirs.buffer);
            }
        }
    }

    /// Write buffers of the given phase into the storage as the highest
    /// derivative of the target quantity (the value for zero-order
    /// quantities). The target is replaced; gravity and external forces
    /// add their contributions afterwards.
    pub fn store_into(&self, storage: &mut Storage, phase: Phase) -> ImpactResult<()> {
        for element in &self.elements {
            if element.phase != phase {
                continue;
            }
            let order = storage.quantity(element.id)?.order();
            match &element.buffer {
                AccBuffer::Scalar(buffer) => store_buffer(storage, element.id, order, buffer)?,
                AccBuffer::Vector(buffer) => store_buffer(storage, element.id, order, buffer)?,
                AccBuffer::SymmetricTensor(buffer) => {
                    store_buffer(storage, element.id, order, buffer)?
                }
                AccBuffer::TracelessTensor(buffer) => {
                    store_buffer(storage, element.id, order, buffer)?
                }
            }
        }
        Ok(())
    }
}

fn store_buffer<T: crate::storage::QuantityValue>(
    storage: &mut Storage,
    id: QuantityId,
    order: OrderEnum,
    buffer: &[T],
) -> ImpactResult<()> {
    let target: &mut [T] = match order {
        OrderEnum::Zero => storage.value_mut(id)?,
        OrderEnum::First => storage.dt_mut(id)?,
        OrderEnum::Second => storage.d2t_mut(id)?,
    };
    debug_assert!(target.len() == buffer.len());
    target.clone_from_slice(buffer);
    Ok(())
}

/// Read-only views of the storage quantities consumed by derivatives,
/// assembled once per phase by the solver.
#[derive(Clone, Copy, Default)]
pub struct DerivativeInput<'a> {
    pub r: &'a [Vector],
    pub v: &'a [Vector],
    pub m: &'a [f64],
    pub rho: &'a [f64],
    pub p: &'a [f64],
    pub u: &'a [f64],
    pub cs: &'a [f64],
    pub flag: Option<&'a [u64]>,
    pub stress: Option<&'a [TracelessTensor]>,
    pub damage: Option<&'a [f64]>,
    pub reduce: Option<&'a [f64]>,
    /// Angular-momentum correction tensors from the precomputation
    /// phase, already inverted.
    pub correction: Option<&'a [SymmetricTensor]>,
}

impl<'a> DerivativeInput<'a> {
    /// (1 - D^3) factor scaling the deviatoric stress of particle i.
    pub fn damage_reduction(&self, i: usize) -> f64 {
        match self.damage {
            Some(damage) => 1.0 - damage[i].powi(3),
            None => 1.0,
        }
    }

    /// Particles belong to the same body; single-body stores carry no
    /// flags and everything interacts.
    pub fn same_body(&self, i: usize, j: usize) -> bool {
        match self.flag {
            Some(flag) => flag[i] == flag[j],
            None => true,
        }
    }
}

/// A pairwise contribution accumulated over neighbours.
pub trait Derivative: Send + Sync {
    fn phase(&self) -> Phase {
        Phase::Evaluation
    }

    fn symmetry(&self) -> Symmetry {
        Symmetry::Symmetric
    }

    /// Declare output buffers; called once at setup.
    fn create(&self, results: &mut Accumulated) -> ImpactResult<()>;

    /// Accumulate contributions of particle i against its neighbours.
    /// With `symmetric` the derivative must also write the j side.
    fn eval(
        &self,
        i: usize,
        neighbours: &[usize],
        grads: &[Vector],
        input: &DerivativeInput<'_>,
        results: &mut Accumulated,
        symmetric: bool,
    );
}

/// Ordered set of derivatives with their shared accumulation template.
#[derive(Default)]
pub struct DerivativeHolder {
    derivatives: Vec<Box<dyn Derivative>>,
    template: Accumulated,
}

impl DerivativeHolder {
    pub fn new() -> Self {
        DerivativeHolder::default()
    }

    pub fn require(&mut self, derivative: Box<dyn Derivative>) -> ImpactResult<()> {
        derivative.create(&mut self.template)?;
        self.derivatives.push(derivative);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.derivatives.is_empty()
    }

    /// The pair loop may use the rank filter only when every derivative
    /// writes both sides.
    pub fn is_symmetric(&self) -> bool {
        self.derivatives
            .iter()
            .all(|derivative| derivative.symmetry() == Symmetry::Symmetric)
    }

    pub fn has_phase(&self, phase: Phase) -> bool {
        self.derivatives
            .iter()
            .any(|derivative| derivative.phase() == phase)
    }

    /// Fresh thread-local accumulator with every declared buffer.
    pub fn make_accumulated(&self) -> Accumulated {
        self.template.clone()
    }

    pub fn eval_phase(
        &self,
        phase: Phase,
        i: usize,
        neighbours: &[usize],
        grads: &[Vector],
        input: &DerivativeInput<'_>,
        results: &mut Accumulated,
        symmetric: bool,
    ) {
        for derivative in &self.derivatives {
            if derivative.phase() == phase {
                derivative.eval(i, neighbours, grads, input, results, symmetric);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DivergenceLike {
        source: BufferSource,
    }

    impl Derivative for DivergenceLike {
        fn create(&self, results: &mut Accumulated) -> ImpactResult<()> {
            results.insert_scalar(QuantityId::VelocityDivergence, Phase::Evaluation, self.source)
        }

        fn eval(
            &self,
            i: usize,
            neighbours: &[usize],
            _grads: &[Vector],
            _input: &DerivativeInput<'_>,
            results: &mut Accumulated,
            symmetric: bool,
        ) {
            let buffer = results.scalar_mut(QuantityId::VelocityDivergence);
            for &j in neighbours {
                buffer[i] += 1.0;
                if symmetric {
                    buffer[j] += 1.0;
                }
            }
        }
    }

    #[test]
    fn test_duplicate_unique_buffer_fails() {
        let mut holder = DerivativeHolder::new();
        holder
            .require(Box::new(DivergenceLike {
                source: BufferSource::Unique,
            }))
            .unwrap();
        let result = holder.require(Box::new(DivergenceLike {
            source: BufferSource::Unique,
        }));
        assert!(matches!(result, Err(ImpactError::InvalidSetup(_))));
    }

    #[test]
    fn test_shared_buffer_allowed() {
        let mut holder = DerivativeHolder::new();
        holder
            .require(Box::new(DivergenceLike {
                source: BufferSource::Shared,
            }))
            .unwrap();
        holder
            .require(Box::new(DivergenceLike {
                source: BufferSource::Shared,
            }))
            .unwrap();
        assert_eq!(holder.make_accumulated().buffer_count(), 1);
    }

    #[test]
    fn test_thread_buffer_reduction_order() {
        let mut main = Accumulated::default();
        main.insert_scalar(
            QuantityId::VelocityDivergence,
            Phase::Evaluation,
            BufferSource::Unique,
        )
        .unwrap();
        main.initialize(3);
        let mut a = main.clone();
        let mut b = main.clone();
        a.scalar_mut(QuantityId::VelocityDivergence)[0] = 1.0;
        b.scalar_mut(QuantityId::VelocityDivergence)[0] = 2.0;
        b.scalar_mut(QuantityId::VelocityDivergence)[2] = 5.0;
        main.sum(&[a, b]);
        let buffer = main.scalar_mut(QuantityId::VelocityDivergence);
        assert_eq!(buffer[0], 3.0);
        assert_eq!(buffer[1], 0.0);
        assert_eq!(buffer[2], 5.0);
    }

    #[test]
    fn test_store_into_highest_derivative() {
        use crate::storage::OrderEnum;
        let mut storage = Storage::new();
        storage
            .insert(
                QuantityId::Position,
                OrderEnum::Second,
                vec![Vector::zero(); 2],
            )
            .unwrap();
        storage
            .insert_uniform(QuantityId::VelocityDivergence, OrderEnum::Zero, 0.0_f64)
            .unwrap();
        let mut accumulated = Accumulated::default();
        accumulated
            .insert_scalar(
                QuantityId::VelocityDivergence,
                Phase::Evaluation,
                BufferSource::Unique,
            )
            .unwrap();
        accumulated
            .insert_vector(QuantityId::Position, Phase::Evaluation, BufferSource::Unique)
            .unwrap();
        accumulated.initialize(2);
        accumulated.scalar_mut(QuantityId::VelocityDivergence)[1] = 4.0;
        accumulated.vector_mut(QuantityId::Position)[0] = Vector::new(1.0, 0.0, 0.0);
        accumulated.store_into(&mut storage, Phase::Evaluation).unwrap();
        // zero-order writes the value, second-order writes d2t
        assert_eq!(
            storage.value::<f64>(QuantityId::VelocityDivergence).unwrap()[1],
            4.0
        );
        assert_eq!(
            storage.d2t::<Vector>(QuantityId::Position).unwrap()[0],
            Vector::new(1.0, 0.0, 0.0)
        );
    }

    #[test]
    fn test_holder_symmetry_detection() {
        struct Asym;
        impl Derivative for Asym {
            fn symmetry(&self) -> Symmetry {
                Symmetry::Asymmetric
            }
            fn create(&self, results: &mut Accumulated) -> ImpactResult<()> {
                results.insert_vector(
                    QuantityId::XsphVelocity,
                    Phase::Evaluation,
                    BufferSource::Unique,
                )
            }
            fn eval(
                &self,
                _i: usize,
                _neighbours: &[usize],
                _grads: &[Vector],
                _input: &DerivativeInput<'_>,
                _results: &mut Accumulated,
                _symmetric: bool,
            ) {
            }
        }

        let mut holder = DerivativeHolder::new();
        holder
            .require(Box::new(DivergenceLike {
                source: BufferSource::Unique,
            }))
            .unwrap();
        assert!(holder.is_symmetric());
        holder.require(Box::new(Asym)).unwrap();
        assert!(!holder.is_symmetric());
    }
}
