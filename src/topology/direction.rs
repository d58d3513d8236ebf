//! Sweep directions and the upwind/downwind face test.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Orientation of a cell face relative to a sweep direction.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaceOrientation {
    /// Flow enters the cell through this face (upwind neighbor).
    Incoming,
    /// Flow leaves the cell through this face (downwind neighbor).
    Outgoing,
    /// The direction is tangent to the face; no flux crosses it.
    Parallel,
}

/// A discrete-ordinates direction Ω.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Direction {
    omega: [f64; 3],
}

impl Direction {
    /// Relative tolerance below which a face counts as parallel.
    pub const PARALLEL_TOLERANCE: f64 = 1.0e-12;

    /// Build a direction, normalizing non-zero vectors to unit length.
    pub fn new(omega: [f64; 3]) -> Self {
        let norm = norm(omega);
        if norm > 0.0 {
            Self {
                omega: omega.map(|c| c / norm),
            }
        } else {
            Self { omega }
        }
    }

    /// Unit direction components.
    #[inline]
    pub fn omega(&self) -> [f64; 3] {
        self.omega
    }

    /// Ω · n.
    #[inline]
    pub fn dot(&self, normal: [f64; 3]) -> f64 {
        self.omega
            .iter()
            .zip(normal.iter())
            .map(|(a, b)| a * b)
            .sum()
    }

    /// Classify a face with outward `normal`.
    ///
    /// The tolerance is symmetric and scaled by `|n|`, so two ranks looking at
    /// the same face through opposite normals always reach opposite answers.
    pub fn classify(&self, normal: [f64; 3]) -> FaceOrientation {
        let mu = self.dot(normal);
        let tol = Self::PARALLEL_TOLERANCE * norm(normal);
        if mu < -tol {
            FaceOrientation::Incoming
        } else if mu > tol {
            FaceOrientation::Outgoing
        } else {
            FaceOrientation::Parallel
        }
    }

    /// The direction mirrored across a plane with the given normal.
    pub fn reflect(&self, normal: [f64; 3]) -> Direction {
        let n = norm(normal);
        if n == 0.0 {
            return *self;
        }
        let unit = normal.map(|c| c / n);
        let d = self.dot(unit);
        Direction::new([
            self.omega[0] - 2.0 * d * unit[0],
            self.omega[1] - 2.0 * d * unit[1],
            self.omega[2] - 2.0 * d * unit[2],
        ])
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({:.4}, {:.4}, {:.4})",
            self.omega[0], self.omega[1], self.omega[2]
        )
    }
}

fn norm(v: [f64; 3]) -> f64 {
    v.iter().map(|c| c * c).sum::<f64>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_normalizes() {
        let d = Direction::new([3.0, 4.0, 0.0]);
        let [x, y, z] = d.omega();
        assert!((x - 0.6).abs() < 1e-15);
        assert!((y - 0.8).abs() < 1e-15);
        assert_eq!(z, 0.0);
    }

    #[test]
    fn classify_faces() {
        let d = Direction::new([1.0, 0.0, 0.0]);
        assert_eq!(d.classify([-1.0, 0.0, 0.0]), FaceOrientation::Incoming);
        assert_eq!(d.classify([1.0, 0.0, 0.0]), FaceOrientation::Outgoing);
        assert_eq!(d.classify([0.0, 1.0, 0.0]), FaceOrientation::Parallel);
        // Nearly tangent faces are treated as parallel from both sides.
        assert_eq!(d.classify([1e-14, 1.0, 0.0]), FaceOrientation::Parallel);
        assert_eq!(d.classify([-1e-14, -1.0, 0.0]), FaceOrientation::Parallel);
    }

    #[test]
    fn reflect_across_plane() {
        let d = Direction::new([1.0, 1.0, 0.0]);
        let r = d.reflect([1.0, 0.0, 0.0]);
        let [x, y, _] = r.omega();
        assert!(x < 0.0 && y > 0.0);
        assert!((x + y).abs() < 1e-14);
    }

    #[test]
    fn display_is_compact() {
        let d = Direction::new([0.0, 0.0, 1.0]);
        assert_eq!(d.to_string(), "(0.0000, 0.0000, 1.0000)");
    }
}
