//! Encoded frame payloads passed from producers into sessions.
//!
//! Two payload flavors exist behind one [`Frame`] type:
//!
//! - **Owned**: the constructor copies the caller's bytes into a private
//!   buffer, so the caller may reuse its source buffer immediately after
//!   the call returns.
//! - **Zero-copy view**: the frame references externally owned memory
//!   through a reference-counted *holder*. The bytes stay valid for as long
//!   as any clone of the frame is alive; the last drop releases the holder,
//!   possibly on a different thread than the one that allocated it.
//!
//! Cloning a [`Frame`] never copies payload bytes — both flavors clone an
//! `Arc`.

use std::fmt;
use std::sync::Arc;

use crate::pool::PoolSlot;

/// Kind of an encoded frame, as reported by the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Video keyframe (I-frame).
    Key,
    /// Predicted video frame (P-frame).
    Inter,
    /// Bidirectionally predicted video frame (B-frame).
    Bidir,
    /// Audio frame.
    Audio,
}

/// Shared-ownership capability keeping a zero-copy buffer alive.
///
/// Anything that can expose its bytes works: `Vec<u8>`, a memory-mapped
/// region wrapper, or a [`PoolSlot`] whose buffer returns to its pool when
/// the last frame referencing it drops.
pub type FrameHolder = Arc<dyn AsRef<[u8]> + Send + Sync>;

#[derive(Clone)]
enum Payload {
    Owned(Arc<[u8]>),
    View {
        holder: FrameHolder,
        offset: usize,
        len: usize,
    },
}

/// An encoded media frame with presentation and protocol timestamps.
#[derive(Clone)]
pub struct Frame {
    /// Presentation timestamp (encoder media time).
    pub pts: i64,
    /// Protocol (RTP) timestamp.
    pub rtp_timestamp: u32,
    pub kind: FrameKind,
    payload: Payload,
}

impl Frame {
    /// Copy `src` into a private buffer. The caller's buffer is free for
    /// reuse as soon as this returns.
    pub fn copy_from(src: &[u8], pts: i64, rtp_timestamp: u32, kind: FrameKind) -> Self {
        Self {
            pts,
            rtp_timestamp,
            kind,
            payload: Payload::Owned(Arc::from(src)),
        }
    }

    /// Build a zero-copy view over `holder`'s bytes at `offset..offset + len`.
    ///
    /// The holder keeps the underlying memory alive; dropping the last clone
    /// of this frame releases it.
    ///
    /// # Panics
    ///
    /// Panics if `offset + len` exceeds the holder's byte length.
    pub fn zero_copy(
        holder: FrameHolder,
        offset: usize,
        len: usize,
        pts: i64,
        rtp_timestamp: u32,
        kind: FrameKind,
    ) -> Self {
        assert!(
            offset + len <= (*holder).as_ref().len(),
            "frame view out of holder bounds"
        );
        Self {
            pts,
            rtp_timestamp,
            kind,
            payload: Payload::View {
                holder,
                offset,
                len,
            },
        }
    }

    /// Build a zero-copy frame over the first `len` bytes of a pooled
    /// buffer. The slot recycles back to its pool when the last clone of
    /// the frame drops.
    pub fn from_pooled_slot(
        slot: PoolSlot<Vec<u8>>,
        len: usize,
        pts: i64,
        rtp_timestamp: u32,
        kind: FrameKind,
    ) -> Self {
        Self::zero_copy(Arc::new(slot), 0, len, pts, rtp_timestamp, kind)
    }

    /// The frame's payload bytes.
    pub fn data(&self) -> &[u8] {
        match &self.payload {
            Payload::Owned(data) => &data[..],
            Payload::View {
                holder,
                offset,
                len,
            } => &(**holder).as_ref()[*offset..*offset + *len],
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        match &self.payload {
            Payload::Owned(data) => data.len(),
            Payload::View { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this frame starts a decodable unit (video keyframe).
    pub fn is_keyframe(&self) -> bool {
        self.kind == FrameKind::Key
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flavor = match self.payload {
            Payload::Owned(_) => "owned",
            Payload::View { .. } => "view",
        };
        f.debug_struct("Frame")
            .field("pts", &self.pts)
            .field("rtp_timestamp", &self.rtp_timestamp)
            .field("kind", &self.kind)
            .field("len", &self.len())
            .field("payload", &flavor)
            .finish()
    }
}
