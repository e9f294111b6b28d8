// ─────────────────────────────────────────────────────────────────────
// SCPN Impact Core — Constants
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Physical constants in SI units.

/// Gravitational constant [m^3 kg^-1 s^-2].
pub const GRAVITY_CONSTANT: f64 = 6.674_30e-11;

/// Molar gas constant [J K^-1 mol^-1].
pub const GAS_CONSTANT: f64 = 8.314_462_618;

/// Astronomical unit [m].
pub const ASTRONOMICAL_UNIT: f64 = 1.495_978_707e11;

/// Mass of the Sun [kg].
pub const SOLAR_MASS: f64 = 1.988_47e30;

/// Mass of the Earth [kg].
pub const EARTH_MASS: f64 = 5.972_17e24;

/// Typical basalt bulk density [kg m^-3], used as the material default.
pub const BASALT_DENSITY: f64 = 2700.0;
