//! MD configuration.
//!
//! All values are in conventional units (Å, fs, K, amu); the integrator
//! converts to atomic units on initialization.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThermostatKind {
    None,
    #[default]
    Berendsen,
    Csvr,
    Andersen,
    NoseHoover,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WallGeometry {
    #[default]
    None,
    Spheric,
    Rect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WallKind {
    #[default]
    LogFermi,
    Harmonic,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct WallSettings {
    pub geometry: WallGeometry,
    pub kind: WallKind,
    /// Sphere radius, Å; 0 auto-sizes from the geometry.
    pub radius: f64,
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
    pub z_min: f64,
    pub z_max: f64,
    /// Wall strength expressed as a temperature, K.
    pub temp: f64,
    /// Steepness of the log-Fermi edge, 1/Å.
    pub beta: f64,
}

impl Default for WallSettings {
    fn default() -> Self {
        WallSettings {
            geometry: WallGeometry::None,
            kind: WallKind::LogFermi,
            radius: 0.0,
            x_min: 0.0,
            x_max: 0.0,
            y_min: 0.0,
            y_max: 0.0,
            z_min: 0.0,
            z_max: 0.0,
            temp: 298.15,
            beta: 6.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MtdSettings {
    /// Master switch for RMSD metadynamics.
    pub enabled: bool,
    /// Bias prefactor k, Hartree.
    pub k_rmsd: f64,
    /// Gaussian width parameter α, 1/Å².
    pub alpha_rmsd: f64,
    /// Deposit a new structure every this many steps.
    pub mtd_steps: usize,
    /// Energy-convergence factor in the deposition gate.
    pub econv: f64,
    /// Well-tempering ΔT, K; used when `wtmtd` is set.
    pub delta_t: f64,
    pub wtmtd: bool,
    /// Freeze the pool: no new depositions after the initial references.
    pub fix_structures: bool,
    /// Atom subset the bias acts on; `None` is all atoms.
    pub atoms: Option<Vec<usize>>,
    /// Hard cap on the number of deposited structures.
    pub max_structures: usize,
    /// Number of worker slots the bias pool is partitioned over.
    pub workers: usize,
}

impl Default for MtdSettings {
    fn default() -> Self {
        MtdSettings {
            enabled: false,
            k_rmsd: 0.1,
            alpha_rmsd: 10.0,
            mtd_steps: 100,
            econv: 100.0,
            delta_t: 1000.0,
            wtmtd: false,
            fix_structures: false,
            atoms: None,
            max_structures: 1000,
            workers: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MdConfig {
    /// Energy model selector, resolved by the workflow layer.
    pub method: String,
    pub thermostat: ThermostatKind,

    /// Time step, fs.
    pub dt: f64,
    /// Simulated time to reach, fs.
    pub max_time: f64,
    /// Target temperature, K.
    pub temperature: f64,
    /// Thermostat coupling time, fs; clamped to at least one time step.
    pub coupling: f64,
    /// Andersen collision rate, 1/fs.
    pub anderson: f64,
    /// Nosé–Hoover chain length.
    pub chain_length: usize,

    /// Remove COM translation/rotation every this many fs; 0 disables.
    pub rm_com: f64,
    /// 1 removes whole-system drift, 2 per-fragment drift, 3 both.
    pub rmrottrans: u8,
    /// Keep the input structure where it is instead of centering.
    pub nocenter: bool,

    /// Trajectory dump interval, steps.
    pub dump: usize,
    /// Status interval, fs.
    pub print: f64,
    /// RNG seed; `None` derives one from system size and temperature.
    pub seed: Option<u64>,
    /// Hydrogen-mass repartitioning factor.
    pub hmass: f64,
    /// Initial-velocity scaling.
    pub velo: f64,
    /// Re-initialize velocities when T drops below this, K; 0 disables.
    pub impuls: f64,
    pub impuls_scaling: f64,
    /// Reset to the last dumped state instead of aborting on instability.
    pub rescue: bool,

    pub rattle: bool,
    pub rattle_12: bool,
    /// Also constrain 1-3 distances. This fixes the enclosed angle only
    /// because the two 1-2 bonds are constrained as well.
    pub rattle_13: bool,
    /// Convergence tolerance on squared 1-2 distances, Bohr².
    pub rattle_tol_12: f64,
    pub rattle_tol_13: f64,
    pub rattle_maxiter: usize,
    /// Multiplier clamp: λ and μ are scaled by 0.1 while above this.
    pub rattle_max: f64,
    /// Smallest tolerated scalar product in the λ denominator.
    pub rattle_min: f64,
    pub rattle_dynamic_tol: bool,
    pub rattle_dynamic_tol_iter: usize,

    pub wall: WallSettings,
    pub mtd: MtdSettings,

    /// Write a standalone restart record every this many steps; 0 disables.
    pub writerestart: usize,
    pub write_xyz: bool,
    /// Ignore any existing restart record.
    pub norestart: bool,
}

impl Default for MdConfig {
    fn default() -> Self {
        MdConfig {
            method: "lj".into(),
            thermostat: ThermostatKind::Berendsen,
            dt: 0.5,
            max_time: 5000.0,
            temperature: 298.15,
            coupling: 10.0,
            anderson: 0.1,
            chain_length: 3,
            rm_com: 100.0,
            rmrottrans: 1,
            nocenter: false,
            dump: 50,
            print: 1000.0,
            seed: None,
            hmass: 1.0,
            velo: 1.0,
            impuls: 0.0,
            impuls_scaling: 0.75,
            rescue: false,
            rattle: false,
            rattle_12: true,
            rattle_13: false,
            rattle_tol_12: 1e-4,
            rattle_tol_13: 1e-4,
            rattle_maxiter: 100,
            rattle_max: 1.0,
            rattle_min: 1e-6,
            rattle_dynamic_tol: false,
            rattle_dynamic_tol_iter: 100,
            wall: WallSettings::default(),
            mtd: MtdSettings::default(),
            writerestart: 0,
            write_xyz: true,
            norestart: false,
        }
    }
}

impl MdConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.dt <= 0.0 {
            return Err("time step must be positive".into());
        }
        if self.max_time < self.dt {
            return Err("max_time is shorter than one step".into());
        }
        if self.chain_length == 0 && self.thermostat == ThermostatKind::NoseHoover {
            return Err("Nosé–Hoover chain length must be at least 1".into());
        }
        if self.mtd.enabled && self.mtd.workers == 0 {
            return Err("metadynamics needs at least one worker slot".into());
        }
        Ok(())
    }

    /// Coupling time, never shorter than one time step.
    pub fn effective_coupling(&self) -> f64 {
        self.coupling.max(self.dt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(MdConfig::default().validate().is_ok());
    }

    #[test]
    fn negative_time_step_is_rejected() {
        let config = MdConfig {
            dt: -1.0,
            ..MdConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn coupling_is_clamped_to_the_time_step() {
        let config = MdConfig {
            dt: 2.0,
            coupling: 0.5,
            ..MdConfig::default()
        };
        assert_eq!(config.effective_coupling(), 2.0);
    }

    #[test]
    fn config_deserializes_from_a_partial_blob() {
        let config: MdConfig = serde_json::from_str(
            r#"{"thermostat": "csvr", "dt": 2.0, "wall": {"geometry": "spheric", "radius": 8.0}}"#,
        )
        .unwrap();
        assert_eq!(config.thermostat, ThermostatKind::Csvr);
        assert_eq!(config.wall.geometry, WallGeometry::Spheric);
        assert_eq!(config.wall.radius, 8.0);
        assert_eq!(config.temperature, 298.15);
    }
}
