//! Thermostats.
//!
//! All routines work on velocities in place; quantities are in atomic units
//! (time in au, energies in Hartree, masses in electron masses).

use crate::core::constants::KB_HARTREE;
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{ChiSquared, Distribution, Normal};

/// Kinetic energy ½ Σ mᵢvᵢ², Hartree.
pub fn kinetic_energy(velocities: &[Vector3<f64>], masses: &[f64]) -> f64 {
    0.5 * velocities
        .iter()
        .zip(masses)
        .map(|(v, &m)| m * v.norm_squared())
        .sum::<f64>()
}

/// Instantaneous temperature from the kinetic energy, K.
pub fn temperature(ekin: f64, dof: usize) -> f64 {
    if dof == 0 {
        return 0.0;
    }
    2.0 * ekin / (KB_HARTREE * dof as f64)
}

/// Weak-coupling rescaling: v ← v·√(1 + (Δt/2)(T₀−T)/(T·τ)).
pub fn berendsen(
    velocities: &mut [Vector3<f64>],
    dt: f64,
    coupling: f64,
    t_target: f64,
    t_current: f64,
) {
    if t_current <= 0.0 {
        return;
    }
    let lambda = (1.0 + (dt / 2.0 * (t_target - t_current)) / (t_current * coupling)).sqrt();
    for v in velocities.iter_mut() {
        *v *= lambda;
    }
}

/// Canonical sampling through velocity rescaling (Bussi–Donadio–Parrinello).
/// Returns the kinetic energy exchanged with the bath this call.
pub fn csvr(
    velocities: &mut [Vector3<f64>],
    masses: &[f64],
    dof: usize,
    t_target: f64,
    dt: f64,
    coupling: f64,
    rng: &mut StdRng,
) -> f64 {
    let ekin = kinetic_energy(velocities, masses);
    if ekin <= 0.0 || dof == 0 {
        return 0.0;
    }
    let ekin_target = 0.5 * KB_HARTREE * t_target * dof as f64;
    let c = (-(dt / 2.0) / coupling).exp();

    let normal = Normal::new(0.0, 1.0).unwrap();
    let chi2 = ChiSquared::new(dof as f64).unwrap();
    let r: f64 = normal.sample(rng);
    let s_nf: f64 = chi2.sample(rng);

    let alpha2 = c
        + (1.0 - c) * (s_nf + r * r) * ekin_target / (dof as f64 * ekin)
        + 2.0 * r * (c * (1.0 - c) * ekin_target / (dof as f64 * ekin)).sqrt();
    let alpha = alpha2.max(0.0).sqrt();
    for v in velocities.iter_mut() {
        *v *= alpha;
    }
    ekin * (alpha2 - 1.0)
}

/// Andersen collisions: with probability rate·Δt per atom, the velocity is
/// redrawn from the Maxwell–Boltzmann distribution and averaged with the
/// current one.
pub fn andersen(
    velocities: &mut [Vector3<f64>],
    inv_masses: &[f64],
    t_target: f64,
    rate: f64,
    dt: f64,
    rng: &mut StdRng,
) {
    let probability = rate * dt;
    for (v, &inv_m) in velocities.iter_mut().zip(inv_masses) {
        if rng.gen::<f64>() < probability {
            let sigma = (KB_HARTREE * t_target * inv_m).sqrt().max(f64::MIN_POSITIVE);
            let normal = Normal::new(0.0, sigma).unwrap();
            let fresh = Vector3::new(
                normal.sample(rng),
                normal.sample(rng),
                normal.sample(rng),
            );
            *v = (*v + fresh) / 2.0;
        }
    }
}

/// Nosé–Hoover chain; the forward and backward chain sweeps are symmetric
/// about the velocity scaling to keep the propagation time-reversible.
#[derive(Debug, Clone)]
pub struct NoseHooverChain {
    pub xi: Vec<f64>,
    pub q: Vec<f64>,
}

impl NoseHooverChain {
    pub fn new(chain_length: usize, t_target: f64, dof: usize) -> NoseHooverChain {
        let length = chain_length.max(1);
        let mut xi = vec![0.0; length];
        let mut q = vec![0.0; length];
        for k in 0..length {
            xi[k] = 10.0_f64.powi(k as i32) - 1.0;
            q[k] = 10.0_f64.powi(k as i32) * KB_HARTREE * t_target * dof as f64 * 100.0;
        }
        NoseHooverChain { xi, q }
    }

    pub fn from_state(xi: Vec<f64>, q: Vec<f64>) -> NoseHooverChain {
        NoseHooverChain { xi, q }
    }

    pub fn apply(
        &mut self,
        velocities: &mut [Vector3<f64>],
        masses: &[f64],
        dof: usize,
        t_target: f64,
        dt: f64,
    ) {
        let ekin = kinetic_energy(velocities, masses);
        let length = self.xi.len();
        let kbt = KB_HARTREE * t_target;

        self.xi[0] += 0.5 * dt * (2.0 * ekin - dof as f64 * kbt) / self.q[0];
        for k in 1..length {
            self.xi[k] +=
                0.5 * dt * (self.q[k - 1] * self.xi[k - 1] * self.xi[k - 1] - kbt) / self.q[k];
        }

        let scale = (-self.xi[0] * dt).exp();
        for v in velocities.iter_mut() {
            *v *= scale;
        }

        for k in (1..length).rev() {
            self.xi[k] +=
                0.5 * dt * (self.q[k - 1] * self.xi[k - 1] * self.xi[k - 1] - kbt) / self.q[k];
        }
        self.xi[0] += 0.5 * dt * (2.0 * ekin - dof as f64 * kbt) / self.q[0];
    }
}
