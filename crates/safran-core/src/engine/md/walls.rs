//! Confining wall potentials.
//!
//! Spherical or rectangular boundaries with either a logarithmic-Fermi or a
//! harmonic edge. Walls contribute an energy and add to the gradient each
//! step; atoms outside the boundary are counted and reported with
//! throttling so a leaky run does not flood the log.
//!
//! Internally everything is in atomic units; the configuration values (Å)
//! are converted once at construction.

use super::config::{WallGeometry, WallKind, WallSettings};
use crate::core::constants::{angstrom_to_bohr, EXP_ARG_CLAMP, KB_HARTREE};
use nalgebra::Vector3;
use tracing::info;

/// Fraction of atoms outside the boundary that always triggers a report.
const REPORT_VIOLATION_FRACTION: f64 = 0.05;
/// Steps between forced reports while any violation persists.
const REPORT_INTERVAL_STEPS: usize = 1000;

#[derive(Debug, Clone)]
pub struct Walls {
    geometry: WallGeometry,
    kind: WallKind,
    /// Bohr.
    radius: f64,
    bounds: [f64; 6],
    /// Hartree (k_B · wall temperature).
    strength: f64,
    /// 1/Bohr.
    beta: f64,
    violation_count: usize,
    last_reported: usize,
}

#[inline]
fn clamped_exp(argument: f64) -> f64 {
    argument.clamp(-EXP_ARG_CLAMP, EXP_ARG_CLAMP).exp()
}

impl Walls {
    /// Builds walls from the settings; zero or inverted bounds are
    /// auto-sized from the current geometry (min/max per axis plus a 20%
    /// margin, at least 5 Å).
    pub fn new(settings: &WallSettings, positions: &[Vector3<f64>]) -> Walls {
        let mut walls = Walls {
            geometry: settings.geometry,
            kind: settings.kind,
            radius: angstrom_to_bohr(settings.radius),
            bounds: [
                angstrom_to_bohr(settings.x_min),
                angstrom_to_bohr(settings.x_max),
                angstrom_to_bohr(settings.y_min),
                angstrom_to_bohr(settings.y_max),
                angstrom_to_bohr(settings.z_min),
                angstrom_to_bohr(settings.z_max),
            ],
            strength: settings.temp * KB_HARTREE,
            beta: settings.beta / angstrom_to_bohr(1.0),
            violation_count: 0,
            last_reported: 0,
        };
        if walls.geometry != WallGeometry::None {
            walls.auto_size(positions);
        }
        walls
    }

    pub fn is_active(&self) -> bool {
        self.geometry != WallGeometry::None
    }

    pub fn violations(&self) -> usize {
        self.violation_count
    }

    pub fn radius_bohr(&self) -> f64 {
        self.radius
    }

    fn auto_size(&mut self, positions: &[Vector3<f64>]) {
        if positions.is_empty() {
            return;
        }
        let margin_floor = angstrom_to_bohr(5.0);
        let mut min = Vector3::repeat(f64::INFINITY);
        let mut max = Vector3::repeat(f64::NEG_INFINITY);
        let mut max_radius = 0.0_f64;
        for p in positions {
            min = min.inf(p);
            max = max.sup(p);
            max_radius = max_radius.max(p.norm());
        }

        for axis in 0..3 {
            let (lo, hi) = (self.bounds[2 * axis], self.bounds[2 * axis + 1]);
            if (lo == 0.0 && hi == 0.0) || hi <= lo {
                let margin = (0.2 * (max[axis] - min[axis])).max(margin_floor);
                self.bounds[2 * axis] = min[axis] - margin;
                self.bounds[2 * axis + 1] = max[axis] + margin;
            }
        }
        if self.radius <= 0.0 {
            self.radius = max_radius + (0.2 * max_radius).max(margin_floor);
            info!(
                radius_bohr = self.radius,
                "spherical wall auto-sized from the geometry"
            );
        }
    }

    /// Adds the wall contribution to the gradient and returns the wall
    /// energy, Hartree.
    pub fn apply(
        &mut self,
        positions: &[Vector3<f64>],
        gradient: &mut [Vector3<f64>],
        step: usize,
    ) -> f64 {
        let (energy, outside) = match (self.geometry, self.kind) {
            (WallGeometry::None, _) => (0.0, 0),
            (WallGeometry::Spheric, WallKind::LogFermi) => {
                self.spheric_log_fermi(positions, gradient)
            }
            (WallGeometry::Spheric, WallKind::Harmonic) => {
                self.spheric_harmonic(positions, gradient)
            }
            (WallGeometry::Rect, WallKind::LogFermi) => self.rect_log_fermi(positions, gradient),
            (WallGeometry::Rect, WallKind::Harmonic) => self.rect_harmonic(positions, gradient),
        };
        self.violation_count = outside;
        if outside > 0 {
            let noisy = outside as f64 > positions.len() as f64 * REPORT_VIOLATION_FRACTION;
            let stale = step.saturating_sub(self.last_reported) > REPORT_INTERVAL_STEPS;
            if noisy || stale {
                info!(
                    outside,
                    atoms = positions.len(),
                    energy,
                    "atoms outside the wall boundary"
                );
                self.last_reported = step;
            }
        }
        energy
    }

    fn spheric_log_fermi(
        &self,
        positions: &[Vector3<f64>],
        gradient: &mut [Vector3<f64>],
    ) -> (f64, usize) {
        let mut energy = 0.0;
        let mut outside = 0;
        for (p, g) in positions.iter().zip(gradient.iter_mut()) {
            let distance = p.norm();
            let expr = clamped_exp(self.beta * (distance - self.radius));
            energy += self.strength * (1.0 + expr).ln();
            if distance > 1e-10 {
                let prefactor = self.strength * self.beta * expr / (distance * (1.0 + expr));
                *g += p * prefactor;
            }
            if distance > self.radius {
                outside += 1;
            }
        }
        (energy, outside)
    }

    fn spheric_harmonic(
        &self,
        positions: &[Vector3<f64>],
        gradient: &mut [Vector3<f64>],
    ) -> (f64, usize) {
        let mut energy = 0.0;
        let mut outside = 0;
        for (p, g) in positions.iter().zip(gradient.iter_mut()) {
            let distance = p.norm();
            if distance <= self.radius || distance < 1e-10 {
                continue;
            }
            outside += 1;
            let excess = distance - self.radius;
            energy += 0.5 * self.strength * excess * excess;
            *g += p * (self.strength * excess / distance);
        }
        (energy, outside)
    }

    fn rect_log_fermi(
        &self,
        positions: &[Vector3<f64>],
        gradient: &mut [Vector3<f64>],
    ) -> (f64, usize) {
        let mut energy = 0.0;
        let mut outside = 0;
        let b = self.beta;
        for (p, g) in positions.iter().zip(gradient.iter_mut()) {
            let mut is_out = false;
            for axis in 0..3 {
                let (lo, hi) = (self.bounds[2 * axis], self.bounds[2 * axis + 1]);
                let x = p[axis];
                let exp_lo = clamped_exp(b * (lo - x));
                let exp_hi = clamped_exp(b * (x - hi));
                energy += self.strength * ((1.0 + exp_lo).ln() + (1.0 + exp_hi).ln());
                g[axis] +=
                    self.strength * b * (exp_hi / (1.0 + exp_hi) - exp_lo / (1.0 + exp_lo));
                is_out |= x < lo || x > hi;
            }
            if is_out {
                outside += 1;
            }
        }
        (energy, outside)
    }

    fn rect_harmonic(
        &self,
        positions: &[Vector3<f64>],
        gradient: &mut [Vector3<f64>],
    ) -> (f64, usize) {
        let mut energy = 0.0;
        let mut outside = 0;
        for (p, g) in positions.iter().zip(gradient.iter_mut()) {
            let mut is_out = false;
            for axis in 0..3 {
                let (lo, hi) = (self.bounds[2 * axis], self.bounds[2 * axis + 1]);
                let x = p[axis];
                let excess = if x < lo {
                    x - lo
                } else if x > hi {
                    x - hi
                } else {
                    continue;
                };
                is_out = true;
                energy += 0.5 * self.strength * excess * excess;
                g[axis] += self.strength * excess;
            }
            if is_out {
                outside += 1;
            }
        }
        (energy, outside)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constants::BOHR_PER_ANGSTROM;

    fn spheric(kind: WallKind, radius: f64) -> WallSettings {
        WallSettings {
            geometry: WallGeometry::Spheric,
            kind,
            radius,
            ..WallSettings::default()
        }
    }

    #[test]
    fn inactive_wall_contributes_nothing() {
        let settings = WallSettings::default();
        let positions = vec![Vector3::new(100.0, 0.0, 0.0)];
        let mut gradient = vec![Vector3::zeros()];
        let mut walls = Walls::new(&settings, &positions);
        let energy = walls.apply(&positions, &mut gradient, 0);
        assert_eq!(energy, 0.0);
        assert_eq!(gradient[0], Vector3::zeros());
    }

    #[test]
    fn log_fermi_pushes_an_escaped_atom_back_inward() {
        let settings = spheric(WallKind::LogFermi, 5.0);
        let inside = vec![Vector3::zeros()];
        let mut walls = Walls::new(&settings, &inside);

        let outside_pos = vec![Vector3::new(8.0 * BOHR_PER_ANGSTROM, 0.0, 0.0)];
        let mut gradient = vec![Vector3::zeros()];
        let energy = walls.apply(&outside_pos, &mut gradient, 1);
        assert!(energy > 0.0);
        // positive x-gradient means the force (−g) points back to the origin
        assert!(gradient[0].x > 0.0);
        assert_eq!(walls.violations(), 1);
    }

    #[test]
    fn harmonic_wall_is_flat_inside() {
        let settings = spheric(WallKind::Harmonic, 5.0);
        let positions = vec![Vector3::new(1.0, 0.0, 0.0)];
        let mut gradient = vec![Vector3::zeros()];
        let mut walls = Walls::new(&settings, &positions);
        let energy = walls.apply(&positions, &mut gradient, 0);
        assert_eq!(energy, 0.0);
        assert_eq!(gradient[0], Vector3::zeros());
        assert_eq!(walls.violations(), 0);
    }

    #[test]
    fn harmonic_wall_grows_quadratically_outside() {
        let settings = spheric(WallKind::Harmonic, 2.0);
        let inside = vec![Vector3::zeros()];
        let mut walls = Walls::new(&settings, &inside);
        let r = 2.0 * BOHR_PER_ANGSTROM;

        let mut g1 = vec![Vector3::zeros()];
        let e1 = walls.apply(&[Vector3::new(r + 1.0, 0.0, 0.0)], &mut g1, 0);
        let mut g2 = vec![Vector3::zeros()];
        let e2 = walls.apply(&[Vector3::new(r + 2.0, 0.0, 0.0)], &mut g2, 0);
        assert!((e2 / e1 - 4.0).abs() < 1e-9);
    }

    #[test]
    fn rect_bounds_auto_size_with_margin() {
        let settings = WallSettings {
            geometry: WallGeometry::Rect,
            ..WallSettings::default()
        };
        let positions = vec![
            Vector3::new(-2.0, 0.0, 0.0),
            Vector3::new(2.0, 1.0, -1.0),
        ];
        let walls = Walls::new(&settings, &positions);
        // at least the 5 Å floor on each side
        assert!(walls.bounds[0] < -2.0 - 5.0 * BOHR_PER_ANGSTROM + 1e-9);
        assert!(walls.bounds[1] > 2.0 + 5.0 * BOHR_PER_ANGSTROM - 1e-9);
    }

    #[test]
    fn rect_log_fermi_gradient_points_inward_on_each_face() {
        let settings = WallSettings {
            geometry: WallGeometry::Rect,
            x_min: -3.0,
            x_max: 3.0,
            y_min: -3.0,
            y_max: 3.0,
            z_min: -3.0,
            z_max: 3.0,
            ..WallSettings::default()
        };
        let inside = vec![Vector3::zeros()];
        let mut walls = Walls::new(&settings, &inside);

        let beyond_x = 5.0 * BOHR_PER_ANGSTROM;
        let mut gradient = vec![Vector3::zeros()];
        walls.apply(&[Vector3::new(beyond_x, 0.0, 0.0)], &mut gradient, 0);
        assert!(gradient[0].x > 0.0);

        let mut gradient = vec![Vector3::zeros()];
        walls.apply(&[Vector3::new(-beyond_x, 0.0, 0.0)], &mut gradient, 0);
        assert!(gradient[0].x < 0.0);
    }

    #[test]
    fn extreme_positions_do_not_overflow() {
        let settings = spheric(WallKind::LogFermi, 5.0);
        let inside = vec![Vector3::zeros()];
        let mut walls = Walls::new(&settings, &inside);
        let mut gradient = vec![Vector3::zeros()];
        let energy = walls.apply(&[Vector3::new(1e6, 0.0, 0.0)], &mut gradient, 0);
        assert!(energy.is_finite());
        assert!(gradient[0].x.is_finite());
    }
}
