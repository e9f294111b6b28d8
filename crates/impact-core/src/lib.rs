// ─────────────────────────────────────────────────────────────────────
// SCPN Impact Core — Impact Core
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Numerical core of the SPH / hard-sphere collision engine: particle
//! storage, neighbour finders, the derivative pipeline, self-gravity,
//! the hard-sphere collision resolver and explicit time-stepping.

pub mod boundary;
pub mod collision;
pub mod derivatives;
pub mod equations;
pub mod finders;
pub mod gravity;
pub mod initial;
pub mod material;
pub mod scheduler;
pub mod solver;
pub mod storage;
pub mod timestepping;
