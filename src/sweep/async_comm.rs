//! Asynchronous Communicator of one angle set.
//!
//! Outgoing interface values are staged per peer while tasks execute, then
//! packed (several records per message, split at `max_message_bytes`) and
//! posted as non-blocking sends by [`AsyncCommunicator::send_data`].
//! [`AsyncCommunicator::receive_data`] drains whatever has arrived from the
//! peers this angle set depends on and maps every record, through the
//! receive index fixed at graph-build time, to exactly one waiting task.
//!
//! Every message carries the sweep epoch. [`AsyncCommunicator::reset`]
//! advances it, so a fast neighbor that has already started the next sweep
//! cannot have its messages consumed by the current one: they are stashed
//! and replayed after the local reset. Messages from an older epoch belong
//! to a sweep that was abandoned or already concluded and are dropped. An
//! unknown record, or a second copy of a record, is a transport failure.

use crate::algs::communicator::{CommTag, Communicator, Request};
use crate::algs::wire::{FluxRecord, WireHdr, decode_flux, encode_flux};
use crate::sweep::fluds::FluxStore;
use crate::sweep::graph::SweepGraph;
use crate::sweep_error::SweepError;
use crate::topology::cell::CellId;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Default flush threshold for one aggregated message.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 64 * 1024;

/// Records staged for sending, per peer. Filled by the compute kernel
/// through the sweep context.
#[derive(Clone, Debug, Default)]
pub struct Outbox {
    staged: BTreeMap<usize, Vec<FluxRecord>>,
}

impl Outbox {
    pub fn stage(&mut self, peer: usize, record: FluxRecord) {
        self.staged.entry(peer).or_default().push(record);
    }

    pub fn is_empty(&self) -> bool {
        self.staged.values().all(Vec::is_empty)
    }

    /// Number of staged records.
    pub fn len(&self) -> usize {
        self.staged.values().map(Vec::len).sum()
    }

    fn clear(&mut self) {
        self.staged.clear();
    }
}

/// Message counters of one communicator, cumulative over its lifetime.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CommStats {
    pub messages_sent: usize,
    pub records_sent: usize,
    pub messages_received: usize,
    pub records_received: usize,
    /// Messages from an earlier epoch, discarded on arrival.
    pub stale_dropped: usize,
}

pub struct AsyncCommunicator<C: Communicator> {
    comm: C,
    tag: CommTag,
    graph: Arc<SweepGraph>,
    max_message_bytes: usize,
    epoch: u64,
    outbox: Outbox,
    in_flight: Vec<(usize, C::SendHandle)>,
    stash: Vec<(usize, u64, Vec<FluxRecord>)>,
    stats: CommStats,
}

impl<C: Communicator> AsyncCommunicator<C> {
    pub fn new(comm: C, graph: Arc<SweepGraph>, tag: CommTag, max_message_bytes: usize) -> Self {
        Self {
            comm,
            tag,
            graph,
            max_message_bytes,
            epoch: 0,
            outbox: Outbox::default(),
            in_flight: Vec::new(),
            stash: Vec::new(),
            stats: CommStats::default(),
        }
    }

    pub fn tag(&self) -> CommTag {
        self.tag
    }

    /// Sweep iteration this communicator is serving.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn stats(&self) -> CommStats {
        self.stats
    }

    pub fn communicator(&self) -> &C {
        &self.comm
    }

    pub fn outbox_mut(&mut self) -> &mut Outbox {
        &mut self.outbox
    }

    /// Stage `values` produced by local cell `src` for remote cell `dst` on `peer`.
    pub fn queue(&mut self, peer: usize, src: CellId, dst: CellId, values: Vec<f64>) {
        self.outbox.stage(peer, FluxRecord { src, dst, values });
    }

    /// Sends posted but not yet completed.
    pub fn num_in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Post every staged record and advance in-flight sends.
    ///
    /// Returns `true` once nothing is staged and every send has completed,
    /// i.e. all send buffers may be reused.
    pub fn send_data(&mut self) -> Result<bool, SweepError> {
        let staged = std::mem::take(&mut self.outbox.staged);
        for (peer, records) in staged {
            for chunk in split_by_size(&records, self.max_message_bytes) {
                let bytes = encode_flux(self.epoch, chunk);
                let handle = self.comm.isend(peer, self.tag, bytes)?;
                self.stats.messages_sent += 1;
                self.stats.records_sent += chunk.len();
                self.in_flight.push((peer, handle));
            }
        }

        let mut i = 0;
        while i < self.in_flight.len() {
            if self.in_flight[i].1.test()? {
                self.in_flight.swap_remove(i);
            } else {
                i += 1;
            }
        }
        Ok(self.in_flight.is_empty())
    }

    /// Poll for arrived data, deposit it in `store`, and return the tasks
    /// each record unblocks (one entry per record, in no particular order).
    pub fn receive_data(&mut self, store: &mut FluxStore) -> Result<Vec<usize>, SweepError> {
        let mut unblocked = Vec::new();

        if !self.stash.is_empty() {
            let (ready, later): (Vec<_>, Vec<_>) = std::mem::take(&mut self.stash)
                .into_iter()
                .partition(|(_, epoch, _)| *epoch == self.epoch);
            self.stash = later;
            for (peer, _, records) in ready {
                self.apply(peer, records, store, &mut unblocked)?;
            }
        }

        for peer in self.graph.incoming_peers() {
            while let Some(bytes) = self.comm.try_recv(peer, self.tag)? {
                let (epoch, records) =
                    decode_flux(&bytes).map_err(|e| SweepError::transport(peer, e))?;
                self.stats.messages_received += 1;
                if epoch > self.epoch {
                    log::trace!(
                        "tag {}: stashing {} record(s) from rank {peer} for epoch {epoch}",
                        self.tag.base(),
                        records.len()
                    );
                    self.stash.push((peer, epoch, records));
                } else if epoch < self.epoch {
                    log::debug!(
                        "tag {}: dropping {} record(s) from rank {peer} left over from sweep {epoch}",
                        self.tag.base(),
                        records.len()
                    );
                    self.stats.stale_dropped += 1;
                } else {
                    self.apply(peer, records, store, &mut unblocked)?;
                }
            }
        }
        Ok(unblocked)
    }

    fn apply(
        &mut self,
        peer: usize,
        records: Vec<FluxRecord>,
        store: &mut FluxStore,
        unblocked: &mut Vec<usize>,
    ) -> Result<(), SweepError> {
        for rec in records {
            let task = self
                .graph
                .task_for_message(peer, rec.src, rec.dst)
                .ok_or_else(|| {
                    SweepError::transport(
                        peer,
                        format!("unexpected record for cell {} from cell {}", rec.dst, rec.src),
                    )
                })?;
            if !store.store_received(rec.src, task, rec.values) {
                return Err(SweepError::transport(
                    peer,
                    format!("duplicate record for cell {} from cell {}", rec.dst, rec.src),
                ));
            }
            self.stats.records_received += 1;
            unblocked.push(task);
        }
        Ok(())
    }

    /// Drop staged data and in-flight handles, and move to the next epoch.
    /// Early messages already stashed for later epochs are kept.
    pub fn reset(&mut self) {
        self.outbox.clear();
        self.in_flight.clear();
        self.epoch += 1;
    }
}

/// Split `records` into consecutive chunks of at most `max_bytes` on the
/// wire. A record larger than the limit travels alone.
fn split_by_size(records: &[FluxRecord], max_bytes: usize) -> Vec<&[FluxRecord]> {
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut size = WireHdr::SIZE;
    for (i, rec) in records.iter().enumerate() {
        let rec_size = rec.wire_size();
        if i > start && size + rec_size > max_bytes {
            chunks.push(&records[start..i]);
            start = i;
            size = WireHdr::SIZE;
        }
        size += rec_size;
    }
    if start < records.len() {
        chunks.push(&records[start..]);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::LocalComm;
    use crate::sweep::graph::build_task_graph;
    use crate::topology::direction::Direction;
    use crate::topology::mesh::LocalPartition;

    const TAG: CommTag = CommTag(0x100);

    /// 4x1 grid split in halves; rank 1's task 0 (global 2) waits on global 1.
    fn pair() -> (AsyncCommunicator<LocalComm>, AsyncCommunicator<LocalComm>) {
        let owner = |i: usize, _j: usize| usize::from(i >= 2);
        let omega = Direction::new([1.0, 0.0, 0.0]);
        let world = LocalComm::world(2);
        let mut comms = world.into_iter();
        let g0 = build_task_graph(&LocalPartition::grid_2d(4, 1, 0, owner), omega).unwrap();
        let g1 = build_task_graph(&LocalPartition::grid_2d(4, 1, 1, owner), omega).unwrap();
        (
            AsyncCommunicator::new(comms.next().unwrap(), Arc::new(g0), TAG, DEFAULT_MAX_MESSAGE_BYTES),
            AsyncCommunicator::new(comms.next().unwrap(), Arc::new(g1), TAG, DEFAULT_MAX_MESSAGE_BYTES),
        )
    }

    fn rec(src: u64, dst: u64, v: f64) -> FluxRecord {
        FluxRecord {
            src: CellId::new(src),
            dst: CellId::new(dst),
            values: vec![v],
        }
    }

    #[test]
    fn delivers_to_the_waiting_task() {
        let (mut a, mut b) = pair();
        let mut store = FluxStore::new();
        assert!(b.receive_data(&mut store).unwrap().is_empty());

        a.queue(1, CellId::new(1), CellId::new(2), vec![3.5]);
        assert!(a.send_data().unwrap());
        assert_eq!(a.stats().messages_sent, 1);

        assert_eq!(b.receive_data(&mut store).unwrap(), vec![0]);
        assert_eq!(store.received(CellId::new(1), 0), Some(&[3.5][..]));
        assert_eq!(b.stats().records_received, 1);
    }

    #[test]
    fn duplicate_record_is_transport_failure() {
        let (mut a, mut b) = pair();
        let mut store = FluxStore::new();
        a.queue(1, CellId::new(1), CellId::new(2), vec![1.0]);
        a.queue(1, CellId::new(1), CellId::new(2), vec![1.0]);
        a.send_data().unwrap();
        let err = b.receive_data(&mut store).unwrap_err();
        assert!(matches!(err, SweepError::TransportFailure { peer: 0, .. }));
    }

    #[test]
    fn unknown_record_is_transport_failure() {
        let (mut a, mut b) = pair();
        a.queue(1, CellId::new(0), CellId::new(3), vec![1.0]);
        a.send_data().unwrap();
        let err = b.receive_data(&mut FluxStore::new()).unwrap_err();
        assert!(err.to_string().contains("unexpected record"));
    }

    #[test]
    fn oversized_record_count_is_transport_failure() {
        let (a, mut b) = pair();
        let hdr = WireHdr::new(crate::algs::wire::KIND_FLUX, 0, u32::MAX as usize);
        let raw = bytes::Bytes::copy_from_slice(bytemuck::bytes_of(&hdr));
        a.communicator().isend(1, TAG, raw).unwrap();
        let err = b.receive_data(&mut FluxStore::new()).unwrap_err();
        assert!(matches!(err, SweepError::TransportFailure { peer: 0, .. }));
    }

    #[test]
    fn future_epoch_is_stashed_until_reset() {
        let (mut a, mut b) = pair();
        a.reset();
        a.queue(1, CellId::new(1), CellId::new(2), vec![9.0]);
        a.send_data().unwrap();

        let mut store = FluxStore::new();
        assert!(b.receive_data(&mut store).unwrap().is_empty());
        assert_eq!(store.num_received(), 0);

        b.reset();
        let mut store = FluxStore::new();
        assert_eq!(b.receive_data(&mut store).unwrap(), vec![0]);
        assert_eq!(store.received(CellId::new(1), 0), Some(&[9.0][..]));
    }

    #[test]
    fn stale_epoch_is_dropped() {
        let (mut a, mut b) = pair();
        a.queue(1, CellId::new(1), CellId::new(2), vec![1.0]);
        a.send_data().unwrap();
        b.reset();
        let mut store = FluxStore::new();
        assert!(b.receive_data(&mut store).unwrap().is_empty());
        assert_eq!(store.num_received(), 0);
        assert_eq!(b.stats().stale_dropped, 1);

        // The sender catches up; its next-sweep record is accepted.
        a.reset();
        a.queue(1, CellId::new(1), CellId::new(2), vec![2.0]);
        a.send_data().unwrap();
        assert_eq!(b.receive_data(&mut store).unwrap(), vec![0]);
        assert_eq!(store.received(CellId::new(1), 0), Some(&[2.0][..]));
    }

    #[test]
    fn split_respects_message_limit() {
        let records: Vec<FluxRecord> = (0..5).map(|i| rec(i, i + 1, 0.0)).collect();
        let one = records[0].wire_size();
        let chunks = split_by_size(&records, WireHdr::SIZE + 2 * one);
        assert_eq!(chunks.iter().map(|c| c.len()).collect::<Vec<_>>(), vec![2, 2, 1]);
        // A limit smaller than any record still makes progress.
        assert_eq!(split_by_size(&records, 1).len(), 5);
        assert!(split_by_size(&[], 1).is_empty());
    }
}
