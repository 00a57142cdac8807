//! Tagged integer handles and the slot tables they index into.
//!
//! A [`Handle`] packs a node type tag, a slot generation and a slot index into
//! a single 32-bit value that application code can store and pass around
//! freely. The graph decodes handles on every call and rejects anything whose
//! tag, index or generation does not match a live slot.

mod table;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use table::{HandleTable, SlotId, GENERATION_MASK, MAX_SLOTS};

const TAG_MASK: u32 = 0x7000_0000;
const SOURCE_TAG: u32 = 0x1000_0000;
const SUBMIX_TAG: u32 = 0x2000_0000;
const SIGN_BIT: u32 = 0x8000_0000;
const GENERATION_SHIFT: u32 = 16;
const INDEX_MASK: u32 = 0x0000_ffff;

/// The two disjoint node namespaces addressed by handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleKind {
    Source,
    Submix,
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandleKind::Source => f.write_str("source"),
            HandleKind::Submix => f.write_str("submix"),
        }
    }
}

/// Opaque node handle.
///
/// Only [`Handle::ROOT`] is meant to be written down by callers; every other
/// handle comes back from the graph.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(u32);

impl Handle {
    /// The always-present root submix (slot 0, generation 0).
    pub const ROOT: Handle = Handle(SUBMIX_TAG);

    /// Reinterprets a raw value previously obtained from [`Handle::raw`].
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw 32-bit encoding.
    pub const fn raw(self) -> u32 {
        self.0
    }

    pub(crate) fn source(slot: SlotId) -> Self {
        Self::encode(SOURCE_TAG, slot)
    }

    pub(crate) fn submix(slot: SlotId) -> Self {
        Self::encode(SUBMIX_TAG, slot)
    }

    fn encode(tag: u32, slot: SlotId) -> Self {
        let generation = u32::from(slot.generation() & GENERATION_MASK) << GENERATION_SHIFT;
        Self(tag | generation | u32::from(slot.index()))
    }

    /// Returns the node type encoded in the tag, or `None` for values that
    /// carry no valid tag.
    pub fn kind(self) -> Option<HandleKind> {
        if self.0 & SIGN_BIT != 0 {
            return None;
        }
        match self.0 & TAG_MASK {
            SOURCE_TAG => Some(HandleKind::Source),
            SUBMIX_TAG => Some(HandleKind::Submix),
            _ => None,
        }
    }

    /// Decodes the slot if this is a source handle.
    pub fn as_source(self) -> Option<SlotId> {
        (self.kind() == Some(HandleKind::Source)).then(|| self.slot())
    }

    /// Decodes the slot if this is a submix handle.
    pub fn as_submix(self) -> Option<SlotId> {
        (self.kind() == Some(HandleKind::Submix)).then(|| self.slot())
    }

    fn slot(self) -> SlotId {
        let index = (self.0 & INDEX_MASK) as u16;
        let generation = ((self.0 >> GENERATION_SHIFT) as u16) & GENERATION_MASK;
        SlotId::new(index, generation)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            Some(kind) => {
                let slot = self.slot();
                write!(f, "{kind}#{}.{}", slot.index(), slot.generation())
            }
            None => write!(f, "invalid#{:#010x}", self.0),
        }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({self})")
    }
}
