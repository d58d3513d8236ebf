//! Boundary gateways: readiness and incoming values of mesh boundaries.
//!
//! An angle set queries every gateway its cells touch before it runs
//! anything, and reads boundary values through
//! [`SweepContext::boundary_value`](crate::sweep::kernel::SweepContext::boundary_value).
//! Gateways are shared between angle sets (and groupsets) as
//! `Arc<dyn BoundaryGateway>`, so writes go through interior mutability.
//!
//! Directions are addressed by their index in the quadrature; groups by
//! their global group index.

use crate::sweep_error::SweepError;
use crate::topology::direction::{Direction, FaceOrientation};
use crate::topology::mesh::BoundaryId;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Range;
use std::sync::Arc;

/// A node on a boundary face of a local cell.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FaceNode {
    pub cell: usize,
    pub face: usize,
    pub node: usize,
}

impl FaceNode {
    pub fn new(cell: usize, face: usize, node: usize) -> Self {
        Self { cell, face, node }
    }
}

pub trait BoundaryGateway: Send + Sync {
    /// Whether incoming values for `directions` × `groups` are available.
    fn is_ready(&self, directions: &[usize], groups: Range<usize>) -> bool;

    fn is_reflecting(&self) -> bool {
        false
    }

    /// Angular flux entering the domain at `at`.
    fn incoming_value(&self, at: FaceNode, direction: usize, group: usize) -> f64;

    /// Record the angular flux leaving the domain at `at`.
    fn set_outgoing_value(&self, _at: FaceNode, _direction: usize, _group: usize, _value: f64) {}

    fn zero_flux(&self, _group: usize) -> f64 {
        0.0
    }

    /// Called once by an angle set when all of its outgoing writes for
    /// `directions` × `groups` are done.
    fn mark_outgoing_complete(&self, _directions: &[usize], _groups: Range<usize>) {}

    /// Forget completion marks ahead of the next sweep iteration.
    fn reset_ready_status(&self) {}
}

/// Registered gateways by boundary id.
pub type BoundaryMap = BTreeMap<BoundaryId, Arc<dyn BoundaryGateway>>;

/// Incoming value of a boundary as seen by the sweep: reflecting boundaries
/// always supply their stored value; other boundaries only contribute while
/// the surface source is active.
pub fn psi_boundary(
    gateway: &dyn BoundaryGateway,
    at: FaceNode,
    direction: usize,
    group: usize,
    surface_source_active: bool,
) -> f64 {
    if gateway.is_reflecting() || surface_source_active {
        gateway.incoming_value(at, direction, group)
    } else {
        gateway.zero_flux(group)
    }
}

/// Nothing enters the domain.
#[derive(Copy, Clone, Debug, Default)]
pub struct VacuumBoundary;

impl BoundaryGateway for VacuumBoundary {
    fn is_ready(&self, _directions: &[usize], _groups: Range<usize>) -> bool {
        true
    }

    fn incoming_value(&self, _at: FaceNode, _direction: usize, _group: usize) -> f64 {
        0.0
    }
}

/// Fixed incoming angular flux per group, identical for every direction.
#[derive(Clone, Debug)]
pub struct IsotropicBoundary {
    values: Vec<f64>,
}

impl IsotropicBoundary {
    pub fn new(values: impl Into<Vec<f64>>) -> Self {
        Self {
            values: values.into(),
        }
    }
}

impl BoundaryGateway for IsotropicBoundary {
    fn is_ready(&self, _directions: &[usize], _groups: Range<usize>) -> bool {
        true
    }

    /// Groups past the configured ones see no source.
    fn incoming_value(&self, _at: FaceNode, _direction: usize, group: usize) -> f64 {
        self.values.get(group).copied().unwrap_or(0.0)
    }
}

/// Specular reflection.
///
/// Each incoming direction reads the values written for the outgoing
/// direction it mirrors, so it only becomes ready once the angle set
/// owning that outgoing direction has finished. With `opposing_reflected`
/// (two reflecting boundaries facing each other, which would otherwise
/// wait on one another) the boundary is always ready and serves whatever
/// the previous iteration left behind.
pub struct ReflectingBoundary {
    reflected: HashMap<usize, usize>,
    opposing_reflected: bool,
    psi: RwLock<HashMap<(FaceNode, usize, usize), f64>>,
    completed: RwLock<HashSet<(usize, usize)>>,
}

impl ReflectingBoundary {
    /// `pairs` maps each incoming direction to the outgoing direction it reflects.
    pub fn new(pairs: impl IntoIterator<Item = (usize, usize)>) -> Self {
        Self {
            reflected: pairs.into_iter().collect(),
            opposing_reflected: false,
            psi: RwLock::new(HashMap::new()),
            completed: RwLock::new(HashSet::new()),
        }
    }

    pub fn with_opposing_reflected(mut self, opposing: bool) -> Self {
        self.opposing_reflected = opposing;
        self
    }

    /// Pair up a quadrature against a planar boundary with outward `normal`.
    ///
    /// # Errors
    /// [`SweepError::DegenerateGeometry`] when an incoming direction has no
    /// mirror image in the quadrature.
    pub fn from_directions(directions: &[Direction], normal: [f64; 3]) -> Result<Self, SweepError> {
        const MATCH_TOLERANCE: f64 = 1.0e-8;
        let mut pairs = Vec::new();
        for (d, dir) in directions.iter().enumerate() {
            if dir.classify(normal) != FaceOrientation::Incoming {
                continue;
            }
            let image = dir.reflect(normal);
            let partner = directions.iter().position(|o| {
                o.omega()
                    .iter()
                    .zip(image.omega())
                    .all(|(a, b)| (a - b).abs() <= MATCH_TOLERANCE)
            });
            match partner {
                Some(r) => pairs.push((d, r)),
                None => {
                    return Err(SweepError::degenerate(
                        None,
                        format!("direction {d} {dir} has no reflected partner in the quadrature"),
                    ));
                }
            }
        }
        Ok(Self::new(pairs))
    }

    /// Outgoing direction read by incoming direction `direction`.
    pub fn reflected(&self, direction: usize) -> Option<usize> {
        self.reflected.get(&direction).copied()
    }

    pub fn opposing_reflected(&self) -> bool {
        self.opposing_reflected
    }
}

impl BoundaryGateway for ReflectingBoundary {
    fn is_ready(&self, directions: &[usize], groups: Range<usize>) -> bool {
        if self.opposing_reflected {
            return true;
        }
        let completed = self.completed.read();
        directions
            .iter()
            .filter_map(|d| self.reflected.get(d))
            .all(|&r| groups.clone().all(|g| completed.contains(&(r, g))))
    }

    fn is_reflecting(&self) -> bool {
        true
    }

    fn incoming_value(&self, at: FaceNode, direction: usize, group: usize) -> f64 {
        let Some(&r) = self.reflected.get(&direction) else {
            return 0.0;
        };
        self.psi.read().get(&(at, r, group)).copied().unwrap_or(0.0)
    }

    fn set_outgoing_value(&self, at: FaceNode, direction: usize, group: usize, value: f64) {
        self.psi.write().insert((at, direction, group), value);
    }

    fn mark_outgoing_complete(&self, directions: &[usize], groups: Range<usize>) {
        let mut completed = self.completed.write();
        for &d in directions {
            completed.extend(groups.clone().map(|g| (d, g)));
        }
    }

    fn reset_ready_status(&self) {
        self.completed.write().clear();
    }
}
