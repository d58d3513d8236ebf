//! End-to-end sweep scenarios on a single rank.
mod util;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use sweep_sieve::prelude::*;
use util::*;

fn chain(n: usize) -> LocalPartition {
    LocalPartition::grid_2d(n, 1, 0, |_, _| 0)
}

#[test]
fn chain_sweeps_in_index_order_in_one_scan() {
    let graph = Arc::new(build_task_graph(&chain(4), Direction::new([1.0, 0.0, 0.0])).unwrap());
    let mut set = AngleSet::new(0, graph, vec![0], 0..1, NoComm, &vacuum(), &SweepOptions::default()).unwrap();

    let mut order = Vec::new();
    let mut kernel = |ctx: &mut SweepContext<'_>| -> Result<(), SweepError> {
        order.push(ctx.cell());
        Ok(())
    };
    assert_eq!(set.advance(&mut kernel).unwrap(), AngleSetStatus::Finished);
    assert_eq!(set.advance(&mut kernel).unwrap(), AngleSetStatus::Finished);
    assert_eq!(order, vec![0, 1, 2, 3]);
    assert_eq!(set.stats().passes, 1);
}

struct Switch(AtomicBool);

impl BoundaryGateway for Switch {
    fn is_ready(&self, _directions: &[usize], _groups: std::ops::Range<usize>) -> bool {
        self.0.load(Ordering::Acquire)
    }
    fn incoming_value(&self, _at: FaceNode, _direction: usize, _group: usize) -> f64 {
        2.0
    }
}

#[test]
fn unready_boundary_means_receiving_and_no_work() {
    let switch = Arc::new(Switch(AtomicBool::new(false)));
    let mut boundaries = vacuum();
    boundaries.insert(0, switch.clone());
    let graph = Arc::new(build_task_graph(&chain(4), Direction::new([1.0, 0.0, 0.0])).unwrap());
    let mut set = AngleSet::new(0, graph, vec![0], 0..1, NoComm, &boundaries, &SweepOptions::default()).unwrap();

    let mut executed = 0;
    let mut kernel = |_ctx: &mut SweepContext<'_>| -> Result<(), SweepError> {
        executed += 1;
        Ok(())
    };
    assert_eq!(set.advance(&mut kernel).unwrap(), AngleSetStatus::Receiving);
    let stats = set.stats();
    assert_eq!(stats.tasks_executed, 0);
    assert_eq!(stats.comm.messages_sent, 0);

    switch.0.store(true, Ordering::Release);
    assert_eq!(set.advance(&mut kernel).unwrap(), AngleSetStatus::Finished);
    assert_eq!(executed, 4);
}

#[test]
fn cyclic_adjacency_fails_instead_of_hanging() {
    let mut ring = LocalPartition::new(0);
    for g in 0..4 {
        ring.add_cell(CellId::new(g));
    }
    // Each cell's -x face looks at the previous cell, its +y face at the
    // next one: every cell is upwind of its successor around the ring.
    for c in 0..4 {
        ring.add_face(c, [-1.0, 0.0, 0.0], FaceNeighbor::Local((c + 3) % 4)).unwrap();
        ring.add_face(c, [0.0, 1.0, 0.0], FaceNeighbor::Local((c + 1) % 4)).unwrap();
    }
    let err = build_task_graph(&ring, Direction::new([1.0, 0.0, 0.0])).unwrap_err();
    assert!(matches!(err, SweepError::DegenerateGeometry { cell: Some(_), .. }));

    let mut driver = SweepDriver::<NoComm>::new(SweepOptions::default(), BoundaryMap::new());
    let spec = AngleSetSpec::new(Direction::new([1.0, 0.0, 0.0]), [0]);
    let err = driver.build_groupset(0, 0..1, &ring, &NoComm, &[spec]).unwrap_err();
    assert!(matches!(err, SweepError::DegenerateGeometry { .. }));
    assert!(driver.groupset(0).is_err());
}

#[test]
fn isotropic_source_propagates_and_can_be_switched_off() {
    use std::collections::BTreeMap;

    let mesh = LocalPartition::grid_2d(3, 2, 0, |_, _| 0);
    let spec = AngleSetSpec::new(Direction::new([1.0, 0.0, 0.0]), [0]);
    let mut values = BTreeMap::new();

    let mut driver = SweepDriver::new(SweepOptions::default(), boundaries_of(Arc::new(IsotropicBoundary::new([0.5]))));
    driver.build_groupset(0, 0..1, &mesh, &NoComm, &[spec.clone()]).unwrap();
    driver.sweep_groupset(0, &mut accumulate(&mut values)).unwrap();
    // Row of three cells: 1.5, 2.5, 3.5.
    assert_eq!(values[&(0, CellId::new(2))], 3.5);

    let opts = SweepOptions {
        surface_source_active: false,
        ..SweepOptions::default()
    };
    let mut driver = SweepDriver::new(opts, boundaries_of(Arc::new(IsotropicBoundary::new([0.5]))));
    driver.build_groupset(0, 0..1, &mesh, &NoComm, &[spec]).unwrap();
    driver.sweep_groupset(0, &mut accumulate(&mut values)).unwrap();
    assert_eq!(values[&(0, CellId::new(2))], 3.0);
}

#[test]
fn repeated_sweeps_are_identical() {
    use std::collections::BTreeMap;

    let mesh = LocalPartition::grid_2d(5, 4, 0, |_, _| 0);
    let mut driver = SweepDriver::new(SweepOptions::default(), vacuum());
    driver.build_groupset(0, 0..1, &mesh, &NoComm, &quadrant_specs()).unwrap();

    let mut first = BTreeMap::new();
    let s1 = driver.sweep_groupset(0, &mut accumulate(&mut first)).unwrap();
    let mut second = BTreeMap::new();
    let s2 = driver.sweep_groupset(0, &mut accumulate(&mut second)).unwrap();
    assert_eq!(first, second);
    assert_eq!(s1.tasks_executed, s2.tasks_executed);
    assert_eq!(first.len(), 4 * 20);
}
