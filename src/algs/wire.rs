//! Fixed, versioned, little-endian wire types for sweep messages.
//!
//! A message is one [`WireHdr`] followed by `count` records of the kind the
//! header names:
//!
//! * [`KIND_FLUX`]: `WireFluxRecord` + `len` little-endian `f64` values,
//!   carrying the outgoing interface values of one producer cell for one
//!   consumer cell.
//! * [`KIND_GRAPH_SUMMARY`]: `WireEdge` records exchanged by global graph
//!   validation.
//!
//! Decoding never trusts the buffer: every length is checked and failures
//! come back as a description the caller turns into a transport error.

use crate::topology::cell::CellId;
use bytemuck::{Pod, Zeroable};
use bytes::{BufMut, Bytes, BytesMut};
use std::mem::size_of;

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 1;

pub const KIND_FLUX: u16 = 1;
pub const KIND_GRAPH_SUMMARY: u16 = 2;

/// All multi-byte integers are stored pre-LE with `.to_le()` and decoded
/// with `from_le`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireHdr {
    pub version_le: u16,
    pub kind_le: u16,
    pub count_le: u32,
    /// Sweep iteration the payload belongs to.
    pub epoch_le: u64,
}

impl WireHdr {
    pub const SIZE: usize = 16;

    pub fn new(kind: u16, epoch: u64, count: usize) -> Self {
        Self {
            version_le: WIRE_VERSION.to_le(),
            kind_le: kind.to_le(),
            count_le: (count as u32).to_le(),
            epoch_le: epoch.to_le(),
        }
    }
    pub fn version(&self) -> u16 {
        u16::from_le(self.version_le)
    }
    pub fn kind(&self) -> u16 {
        u16::from_le(self.kind_le)
    }
    pub fn count(&self) -> usize {
        u32::from_le(self.count_le) as usize
    }
    pub fn epoch(&self) -> u64 {
        u64::from_le(self.epoch_le)
    }
}

/// Flux record header: producer, consumer, number of trailing values.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireFluxRecord {
    pub src_le: u64,
    pub dst_le: u64,
    pub len_le: u64,
}

impl WireFluxRecord {
    pub const SIZE: usize = 24;

    pub fn new(src: CellId, dst: CellId, len: usize) -> Self {
        Self {
            src_le: src.get().to_le(),
            dst_le: dst.get().to_le(),
            len_le: (len as u64).to_le(),
        }
    }
    pub fn src(&self) -> CellId {
        CellId::new(u64::from_le(self.src_le))
    }
    pub fn dst(&self) -> CellId {
        CellId::new(u64::from_le(self.dst_le))
    }
    pub fn len(&self) -> usize {
        u64::from_le(self.len_le) as usize
    }
}

/// Directed edge `(src, dst)` of a graph summary.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireEdge {
    pub src_le: u64,
    pub dst_le: u64,
    pub kind_le: u32,
    pub _pad: u32, // pad to 8-byte alignment (explicit)
}

impl WireEdge {
    pub const SIZE: usize = 24;

    pub fn new(src: CellId, dst: CellId, kind: u32) -> Self {
        Self {
            src_le: src.get().to_le(),
            dst_le: dst.get().to_le(),
            kind_le: kind.to_le(),
            _pad: 0,
        }
    }
    pub fn decode(&self) -> (CellId, CellId, u32) {
        (
            CellId::new(u64::from_le(self.src_le)),
            CellId::new(u64::from_le(self.dst_le)),
            u32::from_le(self.kind_le),
        )
    }
}

/// Interface values travelling from `src` (sender's cell) to `dst`
/// (receiver's cell).
#[derive(Clone, Debug, PartialEq)]
pub struct FluxRecord {
    pub src: CellId,
    pub dst: CellId,
    pub values: Vec<f64>,
}

impl FluxRecord {
    /// Bytes this record occupies on the wire.
    pub fn wire_size(&self) -> usize {
        WireFluxRecord::SIZE + self.values.len() * size_of::<f64>()
    }
}

/// Encode a flux message.
pub fn encode_flux<'a, I>(epoch: u64, records: I) -> Bytes
where
    I: IntoIterator<Item = &'a FluxRecord>,
    I::IntoIter: ExactSizeIterator,
{
    let records = records.into_iter();
    let mut out = BytesMut::with_capacity(WireHdr::SIZE);
    out.extend_from_slice(bytemuck::bytes_of(&WireHdr::new(
        KIND_FLUX,
        epoch,
        records.len(),
    )));
    for rec in records {
        out.reserve(rec.wire_size());
        out.extend_from_slice(bytemuck::bytes_of(&WireFluxRecord::new(
            rec.src,
            rec.dst,
            rec.values.len(),
        )));
        for v in &rec.values {
            out.put_f64_le(*v);
        }
    }
    out.freeze()
}

/// Decode a flux message into `(epoch, records)`.
pub fn decode_flux(buf: &[u8]) -> Result<(u64, Vec<FluxRecord>), String> {
    let (hdr, mut rest) = read_header(buf, KIND_FLUX)?;
    // Every record needs at least its fixed header, so the count is bounded
    // by the buffer before anything is allocated.
    check_count(hdr.count(), WireFluxRecord::SIZE, rest.len(), |n| n <= rest.len())?;
    let mut records = Vec::with_capacity(hdr.count());
    for i in 0..hdr.count() {
        let rec: WireFluxRecord = read_pod(&mut rest)
            .ok_or_else(|| format!("truncated flux record {i} of {}", hdr.count()))?;
        let n_bytes = rec
            .len()
            .checked_mul(size_of::<f64>())
            .filter(|n| *n <= rest.len())
            .ok_or_else(|| format!("flux record {i} claims {} values past end of buffer", rec.len()))?;
        let (vals, tail) = rest.split_at(n_bytes);
        let values = vals
            .chunks_exact(size_of::<f64>())
            .map(|c| f64::from_bits(u64::from_le(bytemuck::pod_read_unaligned(c))))
            .collect();
        rest = tail;
        records.push(FluxRecord {
            src: rec.src(),
            dst: rec.dst(),
            values,
        });
    }
    expect_exact_len(rest.len(), 0).map_err(|e| format!("trailing bytes after flux records: {e}"))?;
    Ok((hdr.epoch(), records))
}

/// Encode a graph summary message for validation round `round`.
pub fn encode_edges(round: u64, edges: &[WireEdge]) -> Bytes {
    let mut out = BytesMut::with_capacity(WireHdr::SIZE + edges.len() * WireEdge::SIZE);
    out.extend_from_slice(bytemuck::bytes_of(&WireHdr::new(
        KIND_GRAPH_SUMMARY,
        round,
        edges.len(),
    )));
    out.extend_from_slice(bytemuck::cast_slice(edges));
    out.freeze()
}

/// Decode a graph summary message into `(round, edges)`.
pub fn decode_edges(buf: &[u8]) -> Result<(u64, Vec<WireEdge>), String> {
    let (hdr, rest) = read_header(buf, KIND_GRAPH_SUMMARY)?;
    check_count(hdr.count(), WireEdge::SIZE, rest.len(), |n| n == rest.len())?;
    let edges = rest
        .chunks_exact(WireEdge::SIZE)
        .map(bytemuck::pod_read_unaligned)
        .collect();
    Ok((hdr.epoch(), edges))
}

pub fn expect_exact_len(actual: usize, expected: usize) -> Result<(), String> {
    if actual == expected {
        Ok(())
    } else {
        Err(format!("expected {expected} bytes, got {actual}"))
    }
}

/// Reject a header `count` whose minimum payload (`count * record_size`)
/// overflows or fails `fits` against the `available` bytes.
fn check_count(
    count: usize,
    record_size: usize,
    available: usize,
    fits: impl Fn(usize) -> bool,
) -> Result<(), String> {
    match count.checked_mul(record_size) {
        Some(n) if fits(n) => Ok(()),
        _ => Err(format!(
            "header claims {count} records of {record_size} bytes, {available} bytes follow"
        )),
    }
}

fn read_header(buf: &[u8], kind: u16) -> Result<(WireHdr, &[u8]), String> {
    let mut rest = buf;
    let hdr: WireHdr = read_pod(&mut rest)
        .ok_or_else(|| format!("message of {} bytes is shorter than its header", buf.len()))?;
    if hdr.version() != WIRE_VERSION {
        return Err(format!(
            "wire version {} (expected {WIRE_VERSION})",
            hdr.version()
        ));
    }
    if hdr.kind() != kind {
        return Err(format!("message kind {} (expected {kind})", hdr.kind()));
    }
    Ok((hdr, rest))
}

/// Read one unaligned POD value off the front of `buf`.
fn read_pod<T: Pod>(buf: &mut &[u8]) -> Option<T> {
    let n = size_of::<T>();
    if buf.len() < n {
        return None;
    }
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Some(bytemuck::pod_read_unaligned(head))
}

#[cfg(test)]
mod layout_tests {
    use super::*;
    use static_assertions::const_assert_eq;

    const_assert_eq!(size_of::<WireHdr>(), WireHdr::SIZE);
    const_assert_eq!(size_of::<WireFluxRecord>(), WireFluxRecord::SIZE);
    const_assert_eq!(size_of::<WireEdge>(), WireEdge::SIZE);
}
