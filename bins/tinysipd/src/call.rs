// tinysip - minimal SIP B2BUA signaling server
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Call records and the fixed-capacity call map.
//!
//! Each call is one slot: two correlated dialogs identified by the A-leg and
//! B-leg Call-IDs, the captured per-leg headers used to synthesize outbound
//! messages, and the shared state machine position. The map keeps a
//! slot-occupancy index behind one lock; each slot body sits behind its own
//! async lock so transitions serialize per call while unrelated calls proceed
//! in parallel.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use smol_str::SmolStr;

/// Dialog correlation prefix: the B-leg Call-ID is the A-leg Call-ID with its
/// first five bytes overwritten by this literal.
pub const B_LEG_PREFIX: &str = "b-leg";

/// Shared call-state machine positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallState {
    #[default]
    Idle,
    Routing,
    Ringing,
    Answered,
    Connected,
    Disconnecting,
}

/// Which dialog of a call an inbound Call-ID matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    A,
    B,
}

/// Media observed per leg. Informational only; no media is relayed.
#[derive(Debug, Clone, Copy, Default)]
pub struct MediaState {
    pub local_media: bool,
    pub remote_media: bool,
}

/// Captured header lines for one leg, verbatim including the
/// `Header-Name: ` prefix, used to synthesize dialog-consistent messages.
#[derive(Debug, Clone, Default)]
pub struct LegHeaders {
    pub from: SmolStr,
    pub via: SmolStr,
    pub cseq: SmolStr,
    pub to: SmolStr,
}

/// One slot of the call map.
#[derive(Debug, Default)]
pub struct Call {
    pub index: usize,
    pub is_active: bool,
    pub state: CallState,
    pub a_leg_uuid: SmolStr,
    pub b_leg_uuid: SmolStr,
    pub a_leg_addr: Option<SocketAddr>,
    pub b_leg_addr: Option<SocketAddr>,
    pub a_leg_headers: LegHeaders,
    pub b_leg_headers: LegHeaders,
    /// Contact URIs as extracted from between `<` and `>`.
    pub a_leg_contact: SmolStr,
    pub b_leg_contact: SmolStr,
    pub a_leg_media: MediaState,
    pub b_leg_media: MediaState,
    pub caller: SmolStr,
    pub callee: SmolStr,
}

impl Call {
    /// Reinitializes the slot to defaults, keeping only its index.
    pub fn reset(&mut self) {
        *self = Call {
            index: self.index,
            ..Call::default()
        };
    }
}

/// Derives the B-leg dialog id from the A-leg Call-ID by overwriting the
/// first five bytes with `"b-leg"`. Shorter Call-IDs collapse to the bare
/// prefix.
pub fn derive_b_leg_uuid(a_leg_uuid: &str) -> SmolStr {
    if a_leg_uuid.len() < B_LEG_PREFIX.len() {
        return SmolStr::new(B_LEG_PREFIX);
    }
    let mut bytes = a_leg_uuid.as_bytes().to_vec();
    bytes[..B_LEG_PREFIX.len()].copy_from_slice(B_LEG_PREFIX.as_bytes());
    SmolStr::new(String::from_utf8_lossy(&bytes))
}

pub type CallHandle = Arc<tokio::sync::Mutex<Call>>;

#[derive(Debug, Clone, Default)]
struct SlotEntry {
    active: bool,
    a_uuid: SmolStr,
    b_uuid: SmolStr,
}

struct SlotIndex {
    entries: Vec<SlotEntry>,
    active: usize,
}

/// Fixed-capacity pool of call slots with Call-ID lookup.
pub struct CallMap {
    slots: Vec<CallHandle>,
    index: Mutex<SlotIndex>,
}

impl CallMap {
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|index| {
                Arc::new(tokio::sync::Mutex::new(Call {
                    index,
                    ..Call::default()
                }))
            })
            .collect();
        Self {
            slots,
            index: Mutex::new(SlotIndex {
                entries: vec![SlotEntry::default(); capacity],
                active: 0,
            }),
        }
    }

    fn index_guard(&self) -> MutexGuard<'_, SlotIndex> {
        self.index.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claims the first free slot, resetting its body and marking it active.
    /// Returns [`None`] when the pool is exhausted.
    pub fn allocate(&self) -> Option<CallHandle> {
        let mut guard = self.index_guard();
        let SlotIndex { entries, active } = &mut *guard;
        if *active >= self.slots.len() {
            return None;
        }
        for (slot, entry) in self.slots.iter().zip(entries.iter_mut()) {
            if entry.active {
                continue;
            }
            // An inactive slot can still be briefly locked by a stale lookup;
            // skip it rather than block under the map lock.
            let Ok(mut call) = slot.try_lock() else { continue };
            entry.active = true;
            entry.a_uuid = SmolStr::default();
            entry.b_uuid = SmolStr::default();
            *active += 1;
            call.reset();
            call.is_active = true;
            return Some(Arc::clone(slot));
        }
        None
    }

    /// Publishes the dialog ids of a freshly allocated slot so lookups can
    /// reach it.
    pub fn bind(&self, slot: usize, a_uuid: SmolStr, b_uuid: SmolStr) {
        let mut index = self.index_guard();
        if let Some(entry) = index.entries.get_mut(slot) {
            entry.a_uuid = a_uuid;
            entry.b_uuid = b_uuid;
        }
    }

    /// Linear scan of active slots. Reports which leg the Call-ID matched.
    pub fn find_by_callid(&self, call_id: &str) -> Option<(CallHandle, Leg)> {
        if call_id.is_empty() {
            return None;
        }
        let index = self.index_guard();
        for (slot, entry) in self.slots.iter().zip(index.entries.iter()) {
            if !entry.active {
                continue;
            }
            if entry.a_uuid == call_id {
                return Some((Arc::clone(slot), Leg::A));
            }
            if entry.b_uuid == call_id {
                return Some((Arc::clone(slot), Leg::B));
            }
        }
        None
    }

    /// Removes a slot from the lookup index. The caller is expected to have
    /// reset the slot body already.
    pub fn release(&self, slot: usize) {
        let mut guard = self.index_guard();
        let SlotIndex { entries, active } = &mut *guard;
        if let Some(entry) = entries.get_mut(slot) {
            if entry.active {
                *entry = SlotEntry::default();
                *active -= 1;
            }
        }
    }

    pub fn active_calls(&self) -> usize {
        self.index_guard().active
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}
