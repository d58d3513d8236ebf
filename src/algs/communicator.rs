//! Thin façade over intra-process or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte buffers* addressed by `(peer, tag)`.
//! Everything here is non-blocking: `isend` posts and returns a handle that
//! is later [`Request::test`]ed, and `try_recv` is a probe that either hands
//! back one complete message or reports that nothing has arrived yet.
//! Between one `(sender, receiver, tag)` triple, messages are delivered in
//! posting order.

use crate::sweep_error::SweepError;
use bytes::Bytes;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;

/// Message tag. Each angle set communicates on its own tag.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct CommTag(pub u16);

impl CommTag {
    /// Tag reserved for collective validation of the sweep graph.
    pub const GRAPH_VALIDATION: CommTag = CommTag(0x7FF0);

    pub const fn new(tag: u16) -> Self {
        CommTag(tag)
    }

    #[inline]
    pub const fn base(self) -> u16 {
        self.0
    }

    /// Tag `n` slots above this one, if it stays below every reserved tag.
    /// Reserved tags also bound the range to what MPI guarantees (`0x7FFF`).
    pub fn checked_offset(self, n: usize) -> Option<CommTag> {
        u16::try_from(n)
            .ok()
            .and_then(|n| self.0.checked_add(n))
            .filter(|&t| t < Self::GRAPH_VALIDATION.0)
            .map(CommTag)
    }
}

/// Non-blocking point-to-point interface (minimal by design).
pub trait Communicator {
    /// Handle returned by `isend`.
    type SendHandle: Request;

    /// Rank of this process.
    fn rank(&self) -> usize;

    /// Number of ranks in the world.
    fn size(&self) -> usize;

    /// Post a send of `buf` to `peer`.
    fn isend(&self, peer: usize, tag: CommTag, buf: Bytes) -> Result<Self::SendHandle, SweepError>;

    /// Take the next complete message from `peer` on `tag`, if one has arrived.
    fn try_recv(&self, peer: usize, tag: CommTag) -> Result<Option<Bytes>, SweepError>;
}

/// Anything that can be polled for completion.
pub trait Request {
    /// `Ok(true)` once the operation has completed locally.
    fn test(&mut self) -> Result<bool, SweepError>;
}

impl Request for () {
    fn test(&mut self) -> Result<bool, SweepError> {
        Ok(true)
    }
}

impl<C: Communicator + ?Sized> Communicator for Arc<C> {
    type SendHandle = C::SendHandle;

    fn rank(&self) -> usize {
        (**self).rank()
    }

    fn size(&self) -> usize {
        (**self).size()
    }

    fn isend(&self, peer: usize, tag: CommTag, buf: Bytes) -> Result<Self::SendHandle, SweepError> {
        (**self).isend(peer, tag, buf)
    }

    fn try_recv(&self, peer: usize, tag: CommTag) -> Result<Option<Bytes>, SweepError> {
        (**self).try_recv(peer, tag)
    }
}

/// Single-rank communicator for serial sweeps.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();

    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn isend(&self, peer: usize, _tag: CommTag, _buf: Bytes) -> Result<(), SweepError> {
        Err(SweepError::transport(peer, "serial communicator has no peers"))
    }

    fn try_recv(&self, _peer: usize, _tag: CommTag) -> Result<Option<Bytes>, SweepError> {
        Ok(None)
    }
}

// --- LocalComm: intra-process ranks sharing one mailbox ---
type Key = (usize, usize, u16); // (src, dst, tag)

#[derive(Debug, Default)]
struct Mailbox {
    slots: DashMap<Key, VecDeque<Bytes>>,
}

/// In-process communicator. Each "world" owns its own mailbox, so
/// independent worlds (e.g. concurrently running tests) never see each
/// other's traffic. Handles are `Send + Sync`; ranks may live on threads.
#[derive(Clone, Debug)]
pub struct LocalComm {
    rank: usize,
    size: usize,
    mailbox: Arc<Mailbox>,
}

impl LocalComm {
    /// Create the communicators of a `size`-rank world, indexed by rank.
    pub fn world(size: usize) -> Vec<LocalComm> {
        let mailbox = Arc::new(Mailbox::default());
        (0..size)
            .map(|rank| LocalComm {
                rank,
                size,
                mailbox: Arc::clone(&mailbox),
            })
            .collect()
    }

    /// Messages posted to this rank that have not been received yet.
    pub fn pending_inbound(&self) -> usize {
        self.mailbox
            .slots
            .iter()
            .filter(|e| e.key().1 == self.rank)
            .map(|e| e.value().len())
            .sum()
    }

    fn check_peer(&self, peer: usize) -> Result<(), SweepError> {
        if peer >= self.size || peer == self.rank {
            return Err(SweepError::transport(
                peer,
                format!("invalid peer for rank {} in a world of {}", self.rank, self.size),
            ));
        }
        Ok(())
    }
}

impl Communicator for LocalComm {
    type SendHandle = ();

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn isend(&self, peer: usize, tag: CommTag, buf: Bytes) -> Result<(), SweepError> {
        self.check_peer(peer)?;
        self.mailbox
            .slots
            .entry((self.rank, peer, tag.base()))
            .or_default()
            .push_back(buf);
        Ok(())
    }

    fn try_recv(&self, peer: usize, tag: CommTag) -> Result<Option<Bytes>, SweepError> {
        self.check_peer(peer)?;
        let key = (peer, self.rank, tag.base());
        Ok(self
            .mailbox
            .slots
            .get_mut(&key)
            .and_then(|mut queue| queue.pop_front()))
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::{CommTag, Communicator, Request};
    use crate::sweep_error::SweepError;
    use bytes::Bytes;
    use mpi::environment::Universe;
    use mpi::request::StaticScope;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;

    /// Communicator over `MPI_COMM_WORLD`.
    pub struct MpiComm {
        world: SimpleCommunicator,
        rank: usize,
        size: usize,
        _universe: Universe,
    }

    impl MpiComm {
        /// Initialize MPI and wrap the world communicator.
        pub fn new() -> Result<Self, SweepError> {
            let universe = mpi::initialize()
                .ok_or_else(|| SweepError::transport(0, "MPI was already initialized"))?;
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Ok(Self {
                world,
                rank,
                size,
                _universe: universe,
            })
        }
    }

    /// Pending `MPI_Isend`. The payload is leaked for the lifetime of the
    /// request and reclaimed once MPI reports completion.
    pub struct MpiSendHandle {
        poll: Box<dyn FnMut() -> bool>,
        buf: Option<*mut [u8]>,
    }

    impl MpiSendHandle {
        fn release(&mut self) {
            if let Some(ptr) = self.buf.take() {
                // SAFETY: `ptr` came from `Box::leak` in `isend`, and the
                // request borrowing it has completed.
                drop(unsafe { Box::from_raw(ptr) });
            }
        }
    }

    impl Request for MpiSendHandle {
        fn test(&mut self) -> Result<bool, SweepError> {
            if self.buf.is_none() {
                return Ok(true);
            }
            if (self.poll)() {
                self.release();
                return Ok(true);
            }
            Ok(false)
        }
    }

    impl Drop for MpiSendHandle {
        fn drop(&mut self) {
            // An MPI request must complete before its buffer can go away.
            while self.buf.is_some() && !(self.poll)() {
                std::thread::yield_now();
            }
            self.release();
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSendHandle;

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn isend(&self, peer: usize, tag: CommTag, buf: Bytes) -> Result<MpiSendHandle, SweepError> {
            if peer >= self.size {
                return Err(SweepError::transport(peer, "rank outside MPI_COMM_WORLD"));
            }
            let leaked: &'static mut [u8] = Box::leak(buf.to_vec().into_boxed_slice());
            let ptr: *mut [u8] = leaked;
            // SAFETY: the slice stays alive until `release`, which only runs
            // after the request has completed.
            let data: &'static [u8] = unsafe { &*ptr };
            let mut req = Some(
                self.world
                    .process_at_rank(peer as i32)
                    .immediate_send_with_tag(StaticScope, data, i32::from(tag.base())),
            );
            let poll = move || match req.take() {
                Some(r) => match r.test() {
                    Ok(_) => true,
                    Err(r) => {
                        req = Some(r);
                        false
                    }
                },
                None => true,
            };
            Ok(MpiSendHandle {
                poll: Box::new(poll),
                buf: Some(ptr),
            })
        }

        fn try_recv(&self, peer: usize, tag: CommTag) -> Result<Option<Bytes>, SweepError> {
            if peer >= self.size {
                return Err(SweepError::transport(peer, "rank outside MPI_COMM_WORLD"));
            }
            let probe = self
                .world
                .process_at_rank(peer as i32)
                .immediate_matched_probe_with_tag(i32::from(tag.base()));
            Ok(probe.map(|(msg, _status)| {
                let (data, _status) = msg.matched_receive_vec::<u8>();
                Bytes::from(data)
            }))
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::{MpiComm, MpiSendHandle};
