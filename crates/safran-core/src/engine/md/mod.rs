//! Molecular-dynamics integration.
//!
//! Velocity-Verlet and RATTLE propagation in Hartree atomic units, with
//! thermostats, confining walls and RMSD metadynamics layered on top. The
//! energy backend is an injected [`EnergyModel`]; positions cross that
//! boundary in Bohr. The run loop checks the stop file between steps,
//! dumps trajectory frames and restart records on their configured
//! intervals, and aborts with a state dump when the dynamics go unstable.

pub mod bias;
pub mod config;
pub mod restart;
pub mod thermostat;
pub mod walls;

pub use bias::RmsdBias;
pub use config::{MdConfig, MtdSettings, ThermostatKind, WallGeometry, WallKind, WallSettings};
pub use restart::MdRestart;
pub use walls::Walls;

use crate::core::constants::{
    amu_to_emass, angstrom_to_bohr, bohr_to_angstrom, fs_to_au_time, KB_HARTREE,
};
use crate::core::geometry::{self, BOND_SCALING};
use crate::core::io::xyz::{append_frame, XyzWriter};
use crate::core::models::Molecule;
use crate::energy::EnergyModel;
use crate::engine::error::EngineError;
use crate::engine::progress::ProgressReporter;
use crate::engine::stop::StopCheck;
use nalgebra::{Matrix3, Point3, Vector3};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use restart::{from_triples, to_triples, BiasRecord, ConstraintRecord};
use std::path::{Path, PathBuf};
use thermostat::NoseHooverChain;
use tracing::{info, instrument, warn};

/// Temperature blow-up factor that marks a step unstable.
const INSTABILITY_FACTOR: f64 = 10_000.0;
/// Bounded number of rescue attempts before giving up.
const MAX_RESCUE: usize = 3;

/// A holonomic distance constraint between two atoms.
#[derive(Debug, Clone, Copy)]
pub struct Constraint {
    pub i: usize,
    pub j: usize,
    /// Squared reference distance, Bohr; captured once at initialization.
    pub d2: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunningAverages {
    pub temperature: f64,
    pub epot: f64,
    pub ekin: f64,
    pub etot: f64,
    pub wall: f64,
    pub virial: f64,
}

impl RunningAverages {
    fn update(&mut self, n: usize, t: f64, epot: f64, ekin: f64, wall: f64, virial: f64) {
        let count = n as f64;
        let merge = |avg: f64, x: f64| (x + count * avg) / (count + 1.0);
        self.temperature = merge(self.temperature, t);
        self.epot = merge(self.epot, epot);
        self.ekin = merge(self.ekin, ekin);
        self.etot = merge(self.etot, epot + ekin);
        self.wall = merge(self.wall, wall);
        self.virial = merge(self.virial, virial);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MdOutcome {
    pub steps: usize,
    pub time_fs: f64,
    pub averages: RunningAverages,
    pub etot_initial: f64,
    pub etot_final: f64,
    pub stopped: bool,
}

pub struct SimpleMd<'a> {
    config: MdConfig,
    molecule: Molecule,
    model: Box<dyn EnergyModel + 'a>,

    positions: Vec<Vector3<f64>>,
    velocities: Vec<Vector3<f64>>,
    gradient: Vec<Vector3<f64>>,
    masses: Vec<f64>,
    inv_masses: Vec<f64>,
    dof: usize,
    fragments: Vec<Vec<usize>>,

    step: usize,
    time_fs: f64,
    epot: f64,
    ekin: f64,
    temperature: f64,
    wall_potential: f64,
    virial_correction: f64,
    bias_energy: f64,
    unstable: bool,
    averages: RunningAverages,

    chain: NoseHooverChain,
    ekin_exchange: f64,
    walls: Walls,
    bias: Option<RmsdBias>,
    constraints_12: Vec<Constraint>,
    constraints_13: Vec<Constraint>,
    rattle_tol_12: f64,
    rattle_temp_acc: f64,
    rattle_counter: usize,

    rng: StdRng,
    seed: u64,
    basename: PathBuf,
    stop: StopCheck,
    reporter: &'a ProgressReporter<'a>,
    rescue_states: Vec<MdRestart>,
    rescues_used: usize,
    restarted: bool,
}

impl<'a> SimpleMd<'a> {
    pub fn new(
        config: MdConfig,
        mut molecule: Molecule,
        model: Box<dyn EnergyModel + 'a>,
        basename: impl Into<PathBuf>,
        reporter: &'a ProgressReporter<'a>,
    ) -> Result<SimpleMd<'a>, EngineError> {
        config.validate().map_err(EngineError::Config)?;
        let basename = basename.into();
        if !config.nocenter {
            molecule.center(true);
        }
        let n = molecule.atom_count();
        if n == 0 {
            return Err(EngineError::Config("the molecule is empty".into()));
        }

        let positions: Vec<Vector3<f64>> = molecule
            .positions()
            .iter()
            .map(|p| p.coords.map(angstrom_to_bohr))
            .collect();
        let masses: Vec<f64> = molecule
            .elements()
            .iter()
            .map(|e| {
                let scale = if e.is_hydrogen() { config.hmass } else { 1.0 };
                amu_to_emass(e.mass() * scale)
            })
            .collect();
        let inv_masses: Vec<f64> = masses.iter().map(|&m| 1.0 / m).collect();
        let fragments = molecule.fragments().to_vec();

        let seed = config
            .seed
            .unwrap_or((n as f64 * config.temperature).max(1.0) as u64);
        info!(seed, "random seed");

        let (constraints_12, constraints_13) = if config.rattle {
            build_constraints(&molecule, &positions, config.rattle_12, config.rattle_13)
        } else {
            (Vec::new(), Vec::new())
        };
        let mut dof = 3 * n;
        if config.rattle {
            dof = dof
                .saturating_sub(constraints_12.len() + constraints_13.len())
                .max(1);
            info!(
                constraints_12 = constraints_12.len(),
                constraints_13 = constraints_13.len(),
                dof,
                "distance constraints active"
            );
        }

        let chain = NoseHooverChain::new(config.chain_length, config.temperature, dof);
        let walls = Walls::new(&config.wall, &positions);
        let bias = if config.mtd.enabled {
            Some(RmsdBias::new(
                config.mtd.clone(),
                molecule.elements(),
                Some(suffixed(&basename, ".mtd.xyz")),
            )?)
        } else {
            None
        };
        let stop = match basename.parent() {
            Some(dir) if dir.as_os_str().len() > 0 => StopCheck::at(dir),
            _ => StopCheck::in_working_dir(),
        };
        let rattle_tol_12 = config.rattle_tol_12;

        let mut md = SimpleMd {
            velocities: vec![Vector3::zeros(); n],
            gradient: vec![Vector3::zeros(); n],
            positions,
            masses,
            inv_masses,
            dof,
            fragments,
            step: 0,
            time_fs: 0.0,
            epot: 0.0,
            ekin: 0.0,
            temperature: 0.0,
            wall_potential: 0.0,
            virial_correction: 0.0,
            bias_energy: 0.0,
            unstable: false,
            averages: RunningAverages::default(),
            chain,
            ekin_exchange: 0.0,
            walls,
            bias,
            constraints_12,
            constraints_13,
            rattle_tol_12,
            rattle_temp_acc: 0.0,
            rattle_counter: 0,
            rng: StdRng::seed_from_u64(seed),
            seed,
            basename,
            stop,
            reporter,
            rescue_states: Vec::new(),
            rescues_used: 0,
            restarted: false,
            config,
            molecule,
            model,
        };

        md.model.set_molecule(&md.molecule);
        if !md.config.norestart {
            md.try_load_restart();
        }
        if !md.restarted {
            md.init_velocities(md.config.velo);
        }
        md.epot = md.compute_forces()?;
        md.update_kinetics();
        Ok(md)
    }

    fn dt_au(&self) -> f64 {
        fs_to_au_time(self.config.dt)
    }

    fn coupling_au(&self) -> f64 {
        fs_to_au_time(self.config.effective_coupling())
    }

    pub fn bias_structure_count(&self) -> usize {
        self.bias.as_ref().map_or(0, |b| b.structure_count())
    }

    pub fn total_energy(&self) -> f64 {
        self.epot + self.ekin
    }

    pub fn current_temperature(&self) -> f64 {
        self.temperature
    }

    fn try_load_restart(&mut self) {
        let path = suffixed(&self.basename, ".restart.json");
        if !path.exists() {
            return;
        }
        match MdRestart::load(&path) {
            Ok(record) => {
                if let Err(e) = self.apply_restart(&record) {
                    warn!("restart record skipped: {}", e);
                } else {
                    info!(step = self.step, "continuing from restart record");
                }
            }
            Err(e) => warn!("restart record skipped: {}", e),
        }
    }

    /// Maxwell–Boltzmann velocities at the target temperature, drift
    /// removed, then rescaled exactly onto T₀·|scaling|.
    fn init_velocities(&mut self, scaling: f64) {
        let t_target = self.config.temperature * scaling.abs().max(f64::MIN_POSITIVE);
        for (v, &inv_m) in self.velocities.iter_mut().zip(&self.inv_masses) {
            let sigma = (KB_HARTREE * self.config.temperature * inv_m)
                .sqrt()
                .max(f64::MIN_POSITIVE);
            let normal = Normal::new(0.0, sigma).unwrap();
            *v = Vector3::new(
                normal.sample(&mut self.rng),
                normal.sample(&mut self.rng),
                normal.sample(&mut self.rng),
            );
        }
        self.remove_whole_system_drift();
        let ekin = thermostat::kinetic_energy(&self.velocities, &self.masses);
        let t_now = thermostat::temperature(ekin, self.dof);
        if t_now > 0.0 {
            let factor = (t_target / t_now).sqrt();
            for v in self.velocities.iter_mut() {
                *v *= factor;
            }
        }
        self.update_kinetics();
    }

    fn compute_forces(&mut self) -> Result<f64, EngineError> {
        self.model.update_geometry(&self.positions);
        let energy = self.model.calculate(true);
        self.gradient.clear();
        self.gradient.extend_from_slice(self.model.gradient());
        if self.model.had_error() || self.model.has_nan() {
            return Err(EngineError::Backend {
                step: self.step,
                reason: "energy model signalled an error or NaN".into(),
            });
        }
        Ok(energy)
    }

    fn update_kinetics(&mut self) {
        self.ekin = thermostat::kinetic_energy(&self.velocities, &self.masses);
        self.temperature = thermostat::temperature(self.ekin, self.dof);
    }

    fn apply_thermostat(&mut self) {
        let dt = self.dt_au();
        let coupling = self.coupling_au();
        match self.config.thermostat {
            ThermostatKind::None => {}
            ThermostatKind::Berendsen => thermostat::berendsen(
                &mut self.velocities,
                dt,
                coupling,
                self.config.temperature,
                self.temperature,
            ),
            ThermostatKind::Csvr => {
                self.ekin_exchange += thermostat::csvr(
                    &mut self.velocities,
                    &self.masses,
                    self.dof,
                    self.config.temperature,
                    dt,
                    coupling,
                    &mut self.rng,
                );
            }
            ThermostatKind::Andersen => thermostat::andersen(
                &mut self.velocities,
                &self.inv_masses,
                self.config.temperature,
                self.config.anderson,
                self.config.dt,
                &mut self.rng,
            ),
            ThermostatKind::NoseHoover => self.chain.apply(
                &mut self.velocities,
                &self.masses,
                self.dof,
                self.config.temperature,
                dt,
            ),
        }
    }

    /// One integration step (Verlet or RATTLE, per configuration).
    pub fn step(&mut self) -> Result<(), EngineError> {
        if self.config.rattle {
            self.rattle_step()
        } else {
            self.verlet_step()
        }
    }

    fn verlet_step(&mut self) -> Result<(), EngineError> {
        let dt = self.dt_au();
        let half_dt2 = 0.5 * dt * dt;
        for i in 0..self.positions.len() {
            let a = self.gradient[i] * self.inv_masses[i];
            self.positions[i] += self.velocities[i] * dt - a * half_dt2;
            self.velocities[i] -= a * (0.5 * dt);
        }

        self.epot = self.compute_forces()?;
        self.inject_bias()?;
        self.wall_potential = self.walls.apply(&self.positions, &mut self.gradient, self.step);

        for i in 0..self.positions.len() {
            self.velocities[i] -= self.gradient[i] * (self.inv_masses[i] * 0.5 * dt);
        }

        self.update_kinetics();
        self.check_stability();
        self.apply_thermostat();
        self.update_kinetics();
        Ok(())
    }

    fn inject_bias(&mut self) -> Result<(), EngineError> {
        let Some(bias) = self.bias.as_mut() else {
            return Ok(());
        };
        let result = bias.apply(&self.positions, &mut self.gradient)?;
        self.bias_energy = result.energy;
        if self.step % self.config.mtd.mtd_steps == 0 {
            bias.maybe_deposit(
                &self.positions,
                result.energy,
                result.rmsd_reference,
                self.step,
            )?;
        }
        Ok(())
    }

    fn check_stability(&mut self) {
        self.unstable = self.temperature.is_nan()
            || self.temperature > INSTABILITY_FACTOR * self.config.temperature.max(1.0)
            || self.positions.iter().any(|p| p.iter().any(|x| x.is_nan()));
    }

    /// RATTLE: velocity-Verlet with iterative Lagrange corrections keeping
    /// every constrained squared distance at its reference (position loop)
    /// and the constrained relative velocities orthogonal to their bond
    /// axes (velocity loop).
    fn rattle_step(&mut self) -> Result<(), EngineError> {
        let dt = self.dt_au();
        let half_dt2 = 0.5 * dt * dt;
        let inv_dt = 1.0 / dt;
        let old_positions = self.positions.clone();

        for i in 0..self.positions.len() {
            let a = self.gradient[i] * self.inv_masses[i];
            self.positions[i] += self.velocities[i] * dt - a * half_dt2;
            self.velocities[i] -= a * (0.5 * dt);
        }

        // position corrections
        let tol_12 = self.rattle_tol_12;
        let tol_13 = self.config.rattle_tol_13;
        for _iter in 0..self.config.rattle_maxiter {
            let mut active = 0;
            for (list, tol) in [(&self.constraints_12, tol_12), (&self.constraints_13, tol_13)]
            {
                for constraint in list.iter() {
                    let (i, j) = (constraint.i, constraint.j);
                    let current = self.positions[i] - self.positions[j];
                    let deviation = constraint.d2 - current.norm_squared();
                    if deviation.abs() <= tol {
                        continue;
                    }
                    active += 1;
                    let axis = old_positions[i] - old_positions[j];
                    let mut scalar = axis.dot(&current);
                    if scalar.abs() < self.config.rattle_min {
                        scalar = self.config.rattle_min.copysign(scalar);
                    }
                    let mut lambda = deviation
                        / ((self.inv_masses[i] + self.inv_masses[j]) * scalar);
                    while lambda.abs() > self.config.rattle_max {
                        lambda *= 0.1;
                    }
                    let shift_i = axis * (lambda * 0.5 * self.inv_masses[i]);
                    let shift_j = axis * (lambda * 0.5 * self.inv_masses[j]);
                    self.positions[i] += shift_i;
                    self.positions[j] -= shift_j;
                    self.velocities[i] += shift_i * inv_dt;
                    self.velocities[j] -= shift_j * inv_dt;
                }
            }
            if active == 0 {
                break;
            }
        }

        self.epot = self.compute_forces()?;
        self.inject_bias()?;
        self.wall_potential = self.walls.apply(&self.positions, &mut self.gradient, self.step);

        for i in 0..self.positions.len() {
            self.velocities[i] -= self.gradient[i] * (self.inv_masses[i] * 0.5 * dt);
        }

        // velocity corrections: zero relative velocity along each bond axis
        self.virial_correction = 0.0;
        for _iter in 0..self.config.rattle_maxiter {
            let mut active = 0;
            for list in [&self.constraints_12, &self.constraints_13] {
                for constraint in list.iter() {
                    let (i, j) = (constraint.i, constraint.j);
                    let axis = self.positions[i] - self.positions[j];
                    let relative = self.velocities[i] - self.velocities[j];
                    let projection = axis.dot(&relative);
                    let d2 = axis.norm_squared();
                    let mut mu =
                        -projection / ((self.inv_masses[i] + self.inv_masses[j]) * d2);
                    if mu.abs() < 1e-14 {
                        continue;
                    }
                    while mu.abs() > self.config.rattle_max {
                        mu *= 0.1;
                    }
                    active += 1;
                    self.virial_correction += mu * d2;
                    self.velocities[i] += axis * (mu * self.inv_masses[i]);
                    self.velocities[j] -= axis * (mu * self.inv_masses[j]);
                }
            }
            if active == 0 {
                break;
            }
        }

        self.update_kinetics();
        self.check_stability();
        self.apply_thermostat();
        self.update_kinetics();

        if self.config.rattle_dynamic_tol {
            self.rattle_temp_acc += self.temperature;
            self.rattle_counter += 1;
            if self.rattle_counter >= self.config.rattle_dynamic_tol_iter {
                self.adjust_rattle_tolerance();
            }
        }
        Ok(())
    }

    fn adjust_rattle_tolerance(&mut self) {
        let average = self.rattle_temp_acc / self.rattle_counter as f64;
        if average > self.config.temperature {
            self.rattle_tol_12 -= 0.01 * self.config.rattle_tol_12;
        } else {
            self.rattle_tol_12 += 0.01 * self.config.rattle_tol_12;
        }
        self.rattle_tol_12 = self.rattle_tol_12.abs();
        self.rattle_temp_acc = 0.0;
        self.rattle_counter = 0;
    }

    fn remove_whole_system_drift(&mut self) {
        let all: Vec<usize> = (0..self.positions.len()).collect();
        remove_drift(&self.positions, &mut self.velocities, &self.masses, &all);
    }

    fn remove_com_motion(&mut self) {
        match self.config.rmrottrans {
            1 => self.remove_whole_system_drift(),
            2 => {
                for fragment in self.fragments.clone() {
                    remove_drift(
                        &self.positions,
                        &mut self.velocities,
                        &self.masses,
                        &fragment,
                    );
                }
            }
            3 => {
                for fragment in self.fragments.clone() {
                    remove_drift(
                        &self.positions,
                        &mut self.velocities,
                        &self.masses,
                        &fragment,
                    );
                }
                self.remove_whole_system_drift();
            }
            _ => {}
        }
        self.update_kinetics();
    }

    fn write_trajectory_frame(&mut self) -> Result<(), EngineError> {
        if !self.config.write_xyz {
            return Ok(());
        }
        let positions: Vec<Point3<f64>> = self
            .positions
            .iter()
            .map(|p| Point3::from(p.map(bohr_to_angstrom)))
            .collect();
        self.molecule.set_positions(positions);
        self.molecule.set_energy(self.epot);
        self.molecule.set_name(format!("{:.2}", self.time_fs));
        append_frame(suffixed(&self.basename, ".trj.xyz"), &self.molecule)?;
        Ok(())
    }

    /// Serializes the complete integrator state.
    pub fn restart_record(&self) -> MdRestart {
        MdRestart {
            method: self.config.method.clone(),
            thermostat: format!("{:?}", self.config.thermostat).to_lowercase(),
            dt: self.config.dt,
            max_time: self.config.max_time,
            temperature: self.config.temperature,
            step: self.step,
            time: self.time_fs,
            seed: self.seed,
            positions: to_triples(&self.positions),
            velocities: to_triples(&self.velocities),
            gradient: to_triples(&self.gradient),
            average_temperature: self.averages.temperature,
            average_epot: self.averages.epot,
            average_ekin: self.averages.ekin,
            average_etot: self.averages.etot,
            average_wall: self.averages.wall,
            average_virial: self.averages.virial,
            xi: self.chain.xi.clone(),
            q: self.chain.q.clone(),
            constraints_12: self
                .constraints_12
                .iter()
                .map(|c| ConstraintRecord {
                    i: c.i,
                    j: c.j,
                    d: c.d2,
                })
                .collect(),
            constraints_13: self
                .constraints_13
                .iter()
                .map(|c| ConstraintRecord {
                    i: c.i,
                    j: c.j,
                    d: c.d2,
                })
                .collect(),
            bias: self
                .bias
                .as_ref()
                .map(|b| b.structures().into_iter().map(BiasRecord::from).collect())
                .unwrap_or_default(),
            ekin_exchange: self.ekin_exchange,
        }
    }

    /// Restores the full state from a record.
    pub fn apply_restart(&mut self, record: &MdRestart) -> Result<(), EngineError> {
        if record.positions.len() != self.positions.len() {
            return Err(EngineError::RestartCorrupt(format!(
                "record has {} atoms, the system {}",
                record.positions.len(),
                self.positions.len()
            )));
        }
        self.positions = from_triples(&record.positions);
        self.velocities = from_triples(&record.velocities);
        self.gradient = from_triples(&record.gradient);
        self.step = record.step;
        self.time_fs = record.time;
        self.averages.temperature = record.average_temperature;
        self.averages.epot = record.average_epot;
        self.averages.ekin = record.average_ekin;
        self.averages.etot = record.average_etot;
        self.averages.wall = record.average_wall;
        self.averages.virial = record.average_virial;
        self.ekin_exchange = record.ekin_exchange;
        if !record.xi.is_empty() && record.xi.len() == record.q.len() {
            self.chain = NoseHooverChain::from_state(record.xi.clone(), record.q.clone());
        }
        if !record.constraints_12.is_empty() || !record.constraints_13.is_empty() {
            self.constraints_12 = record
                .constraints_12
                .iter()
                .map(|c| Constraint {
                    i: c.i,
                    j: c.j,
                    d2: c.d,
                })
                .collect();
            self.constraints_13 = record
                .constraints_13
                .iter()
                .map(|c| Constraint {
                    i: c.i,
                    j: c.j,
                    d2: c.d,
                })
                .collect();
        }
        if let (Some(bias), false) = (self.bias.as_mut(), record.bias.is_empty()) {
            bias.restore(record.bias.iter().map(Into::into).collect());
        }
        self.update_kinetics();
        self.restarted = true;
        Ok(())
    }

    fn write_restart_file(&self, name: &Path) {
        if let Err(e) = self.restart_record().write(name) {
            warn!("could not write restart record: {}", e);
        }
    }

    fn report_status(&self) {
        let mut line = format!(
            "t {:>9.1} fs  Epot {:>14.8}  Ekin {:>12.8}  Etot {:>14.8}  T {:>7.1} K (avg {:>7.1})  wall {:>10.6}",
            self.time_fs,
            self.epot,
            self.ekin,
            self.total_energy(),
            self.temperature,
            self.averages.temperature,
            self.wall_potential,
        );
        if self.bias.is_some() {
            line.push_str(&format!(
                "  bias {:>10.6} ({} structures)",
                self.bias_energy,
                self.bias_structure_count()
            ));
        }
        self.reporter.status(line);
    }

    /// Runs the simulation to `max_time`, the stop file, or instability.
    #[instrument(skip_all, name = "simplemd")]
    pub fn run(&mut self) -> Result<MdOutcome, EngineError> {
        let etot_initial = self.total_energy();
        let mut stopped = false;
        let rm_com_steps = if self.config.rm_com > 0.0 {
            (self.config.rm_com / self.config.dt).max(1.0) as usize
        } else {
            0
        };
        let print_steps = (self.config.print / self.config.dt).max(1.0) as usize;

        if self.config.write_xyz && !self.restarted {
            XyzWriter::create(suffixed(&self.basename, ".trj.xyz"))?;
        }
        self.reporter.pass(format!(
            "MD: {} fs at {} K ({:?} thermostat{})",
            self.config.max_time,
            self.config.temperature,
            self.config.thermostat,
            if self.config.rattle { ", RATTLE" } else { "" }
        ));
        self.report_status();

        while self.time_fs < self.config.max_time {
            if self.stop.requested() {
                info!("stop file found, shutting down");
                self.write_restart_file(&suffixed(&self.basename, ".restart.json"));
                stopped = true;
                break;
            }

            if rm_com_steps > 0 && self.step % rm_com_steps == 0 {
                self.remove_com_motion();
            }

            self.step()?;
            self.averages.update(
                self.step,
                self.temperature,
                self.epot,
                self.ekin,
                self.wall_potential,
                self.virial_correction,
            );

            if self.config.dump > 0 && self.step % self.config.dump == 0 {
                self.write_trajectory_frame()?;
                self.rescue_states.push(self.restart_record());
                if self.rescue_states.len() > 2 {
                    self.rescue_states.remove(0);
                }
            }

            if self.unstable {
                if self.config.rescue
                    && self.rescues_used < MAX_RESCUE
                    && !self.rescue_states.is_empty()
                {
                    warn!("dynamics unstable, resetting to the last stable state");
                    let record = self.rescue_states.last().cloned().unwrap();
                    self.apply_restart(&record)?;
                    self.init_velocities(self.config.velo * self.config.impuls_scaling);
                    self.epot = self.compute_forces()?;
                    self.unstable = false;
                    self.rescues_used += 1;
                    continue;
                }
                self.report_status();
                self.write_restart_file(&suffixed(&self.basename, ".unstable.json"));
                return Err(EngineError::NumericInstability {
                    step: self.step,
                    reason: format!("temperature {:.1} K", self.temperature),
                });
            }

            if self.config.writerestart > 0 && self.step % self.config.writerestart == 0 {
                self.write_restart_file(&suffixed(&self.basename, ".restart.json"));
            }
            if self.step > 0 && self.step % print_steps == 0 {
                self.report_status();
            }
            if self.config.impuls > 0.0 && self.temperature < self.config.impuls {
                self.init_velocities(self.config.velo * self.config.impuls_scaling);
            }

            self.step += 1;
            self.time_fs += self.config.dt;
        }

        self.report_status();
        if self.config.thermostat == ThermostatKind::Csvr {
            info!(
                exchange = self.ekin_exchange,
                "kinetic energy exchanged with the bath"
            );
        }
        self.write_restart_file(&suffixed(&self.basename, ".restart.json"));
        Ok(MdOutcome {
            steps: self.step,
            time_fs: self.time_fs,
            averages: self.averages,
            etot_initial,
            etot_final: self.total_energy(),
            stopped,
        })
    }
}

fn suffixed(basename: &Path, suffix: &str) -> PathBuf {
    let mut name = basename
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "safran".into());
    name.push_str(suffix);
    basename.with_file_name(name)
}

/// Builds the 1-2 (bond) and 1-3 (angle) constraint tables from the bond
/// topology, capturing the squared reference distances.
fn build_constraints(
    molecule: &Molecule,
    positions: &[Vector3<f64>],
    with_12: bool,
    with_13: bool,
) -> (Vec<Constraint>, Vec<Constraint>) {
    let topology = geometry::bond_topology(
        molecule.elements(),
        molecule.positions(),
        BOND_SCALING,
    );
    let n = molecule.atom_count();
    let mut bonds = Vec::new();
    let mut angles = Vec::new();
    if with_12 {
        for i in 0..n {
            for j in 0..i {
                if topology[(i, j)] {
                    bonds.push(Constraint {
                        i,
                        j,
                        d2: (positions[i] - positions[j]).norm_squared(),
                    });
                }
            }
        }
    }
    if with_13 {
        // every pair of neighbors of a common center is a 1-3 distance
        let mut seen = std::collections::HashSet::new();
        for center in 0..n {
            let neighbors: Vec<usize> = (0..n).filter(|&x| topology[(center, x)]).collect();
            for (idx, &a) in neighbors.iter().enumerate() {
                for &c in &neighbors[idx + 1..] {
                    if topology[(a, c)] || !seen.insert((a.min(c), a.max(c))) {
                        continue;
                    }
                    angles.push(Constraint {
                        i: c,
                        j: a,
                        d2: (positions[c] - positions[a]).norm_squared(),
                    });
                }
            }
        }
    }
    (bonds, angles)
}

/// Subtracts the linear and angular momentum of the indexed atom group,
/// solving the group's inertia tensor for the angular velocity. Degenerate
/// (linear) groups only get their translation removed.
fn remove_drift(
    positions: &[Vector3<f64>],
    velocities: &mut [Vector3<f64>],
    masses: &[f64],
    indices: &[usize],
) {
    if indices.is_empty() {
        return;
    }
    let mut mass = 0.0;
    let mut com = Vector3::zeros();
    for &i in indices {
        mass += masses[i];
        com += positions[i] * masses[i];
    }
    com /= mass;

    let mut angular = Vector3::zeros();
    let mut inertia = Matrix3::zeros();
    for &i in indices {
        let r = positions[i] - com;
        let m = masses[i];
        angular += m * r.cross(&velocities[i]);
        inertia[(0, 0)] += m * (r.y * r.y + r.z * r.z);
        inertia[(1, 1)] += m * (r.x * r.x + r.z * r.z);
        inertia[(2, 2)] += m * (r.x * r.x + r.y * r.y);
        inertia[(0, 1)] -= m * r.x * r.y;
        inertia[(0, 2)] -= m * r.x * r.z;
        inertia[(1, 2)] -= m * r.y * r.z;
    }
    inertia[(1, 0)] = inertia[(0, 1)];
    inertia[(2, 0)] = inertia[(0, 2)];
    inertia[(2, 1)] = inertia[(1, 2)];

    let mut linear = Vector3::zeros();
    for &i in indices {
        linear += velocities[i] * masses[i];
    }
    linear /= mass;

    let omega = inertia.try_inverse().map(|inv| inv * angular);
    for &i in indices {
        velocities[i] -= linear;
        if let Some(omega) = omega {
            let r = positions[i] - com;
            velocities[i] -= omega.cross(&r);
        }
    }
}
