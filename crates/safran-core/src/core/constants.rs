//! Physical constants and unit conversions.
//!
//! The engines work in Hartree atomic units internally (positions in Bohr,
//! time in atomic time units, masses in electron masses, energies in
//! Hartree); files and configuration use the conventional chemistry units
//! (Å, fs, amu, Kelvin). All conversions funnel through this module.

/// Boltzmann constant in Hartree per Kelvin.
pub const KB_HARTREE: f64 = 3.166_811_563e-6;

/// One Hartree in kJ/mol, used for energy-difference thresholds.
pub const HARTREE_TO_KJMOL: f64 = 2625.5;

/// One Ångström in Bohr.
pub const BOHR_PER_ANGSTROM: f64 = 1.889_725_988_6;

/// One femtosecond in atomic time units.
pub const AU_TIME_PER_FS: f64 = 41.341_374_575_751;

/// One unified atomic mass unit in electron masses.
pub const EMASS_PER_AMU: f64 = 1_822.888_486_209;

/// Speed of light in cm/s, for rotational constants.
pub const SPEED_OF_LIGHT_CM_S: f64 = 2.997_924_58e10;

/// Planck constant in J·s.
pub const PLANCK_J_S: f64 = 6.626_070_15e-34;

/// Conversion from amu·Å² inertia moments to rotational constants in MHz:
/// B = h / (8 π² I), with I in kg·m².
pub const AMU_ANGSTROM2_TO_KG_M2: f64 = 1.660_539_066_60e-27 * 1e-20;

/// Argument clamp for exponentials in wall potentials; `exp(±700)` is the
/// last safe magnitude before `f64` overflow/underflow.
pub const EXP_ARG_CLAMP: f64 = 700.0;

/// Sentinel cost assigned to element-incompatible pairs in assignment
/// matrices. Any matching that selects one of these is infeasible.
pub const COST_SENTINEL: f64 = 1e10;

#[inline]
pub fn angstrom_to_bohr(x: f64) -> f64 {
    x * BOHR_PER_ANGSTROM
}

#[inline]
pub fn bohr_to_angstrom(x: f64) -> f64 {
    x / BOHR_PER_ANGSTROM
}

#[inline]
pub fn fs_to_au_time(t: f64) -> f64 {
    t * AU_TIME_PER_FS
}

#[inline]
pub fn amu_to_emass(m: f64) -> f64 {
    m * EMASS_PER_AMU
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn angstrom_bohr_round_trip_is_identity() {
        let x = 1.234;
        assert!((bohr_to_angstrom(angstrom_to_bohr(x)) - x).abs() < 1e-12);
    }

    #[test]
    fn room_temperature_thermal_energy_is_about_a_millihartree() {
        let kt = KB_HARTREE * 298.15;
        assert!(kt > 9e-4 && kt < 1e-3);
    }
}
