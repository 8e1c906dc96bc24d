use smallvec::SmallVec;

use crate::pool::Image;
use crate::types::{PixelFormat, SizeClass};

/// Identifies a slot within its bucket.
///
/// Ids are never reused, not even across `clear()`, so a handle from an
/// earlier generation can never address a newer slot.
pub type SlotId = u64;

/// A buffer allocation owned by a slot and charged against the budget.
#[derive(Debug)]
pub struct Occupant {
    id: SlotId,
    bytes: u64,
    /// `None` while the buffer is on loan to a handle.
    resident: Option<Image>,
}

impl Occupant {
    #[inline]
    pub fn is_resident(&self) -> bool {
        self.resident.is_some()
    }
}

/// One capacity unit of a bucket.
#[derive(Debug, Default)]
pub enum Slot {
    #[default]
    Empty,
    Occupied(Occupant),
}

impl Slot {
    #[inline]
    pub fn is_occupied(&self) -> bool {
        matches!(self, Slot::Occupied(_))
    }
}

/// Recyclable buffers for a single size class.
///
/// A bucket never has more than `max_copies` occupied slots. Occupied slots
/// stay occupied while their buffer is on loan, so capacity and budget are
/// reserved for the whole lease and a returning buffer always has a place
/// to go. Callers serialize access with a per-bucket lock.
#[derive(Debug)]
pub struct Bucket {
    class: SizeClass,
    max_copies: u32,
    slots: SmallVec<[Slot; 4]>,
    next_id: SlotId,
}

impl Bucket {
    /// Create an empty bucket
    pub fn new(class: SizeClass, max_copies: u32) -> Self {
        Self {
            class,
            max_copies,
            slots: SmallVec::new(),
            next_id: 0,
        }
    }

    #[inline]
    pub fn class(&self) -> SizeClass {
        self.class
    }

    #[inline]
    pub fn max_copies(&self) -> u32 {
        self.max_copies
    }

    /// Slots holding an allocation, resident or on loan
    pub fn occupied_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_occupied()).count()
    }

    /// Slots holding an idle buffer ready for reuse
    pub fn resident_count(&self) -> usize {
        self.occupants().filter(|o| o.is_resident()).count()
    }

    /// Bytes charged for this bucket's occupied slots
    pub fn occupied_bytes(&self) -> u64 {
        self.occupants().map(|o| o.bytes).sum()
    }

    /// Whether another slot may be occupied
    #[inline]
    pub fn has_capacity(&self) -> bool {
        self.occupied_count() < self.max_copies as usize
    }

    /// Take the first resident buffer that can serve the request.
    ///
    /// Slots are scanned front to back, so among several candidates the
    /// oldest slot wins. The slot stays occupied (now on loan).
    pub fn try_take_reusable(
        &mut self,
        min_width: u32,
        min_height: u32,
        format: PixelFormat,
    ) -> Option<(SlotId, Image)> {
        self.slots.iter_mut().find_map(|slot| match slot {
            Slot::Occupied(occ)
                if occ
                    .resident
                    .as_ref()
                    .is_some_and(|img| img.satisfies(min_width, min_height, format)) =>
            {
                occ.resident.take().map(|img| (occ.id, img))
            }
            _ => None,
        })
    }

    /// Record a freshly allocated buffer as on loan.
    ///
    /// Reuses the first empty slot if there is one. Returns `None` when the
    /// bucket is already at `max_copies`.
    pub fn insert_leased(&mut self, bytes: u64) -> Option<SlotId> {
        if !self.has_capacity() {
            return None;
        }

        let id = self.next_id;
        self.next_id += 1;
        let occupant = Slot::Occupied(Occupant {
            id,
            bytes,
            resident: None,
        });

        match self.slots.iter_mut().find(|s| !s.is_occupied()) {
            Some(empty) => *empty = occupant,
            None => self.slots.push(occupant),
        }
        Some(id)
    }

    /// Put a returned buffer back into the slot reserved for it.
    ///
    /// Returns `false` (and drops the buffer) if the slot no longer exists
    /// or is not on loan.
    pub fn offer(&mut self, id: SlotId, image: Image) -> bool {
        match self.find_mut(id) {
            Some(occ) if occ.resident.is_none() => {
                occ.resident = Some(image);
                true
            }
            _ => false,
        }
    }

    /// Release a loaned slot whose buffer will never come back.
    ///
    /// Returns the bytes to uncharge.
    pub fn vacate(&mut self, id: SlotId) -> Option<u64> {
        let idx = self.slots.iter().position(|slot| match slot {
            Slot::Occupied(occ) => occ.id == id && occ.resident.is_none(),
            Slot::Empty => false,
        })?;

        match std::mem::take(&mut self.slots[idx]) {
            Slot::Occupied(occ) => Some(occ.bytes),
            Slot::Empty => None,
        }
    }

    /// Drop every idle buffer, keeping slots that are on loan.
    ///
    /// Returns the bytes freed.
    pub fn trim_idle(&mut self) -> u64 {
        let mut freed = 0;
        for slot in self.slots.iter_mut() {
            if let Slot::Occupied(occ) = slot {
                if occ.is_resident() {
                    freed += occ.bytes;
                    *slot = Slot::Empty;
                }
            }
        }
        freed
    }

    /// Remove empty slots, keeping the order of the rest.
    ///
    /// Returns how many were removed.
    pub fn prune(&mut self) -> usize {
        let before = self.slots.len();
        self.slots.retain(|s| s.is_occupied());
        before - self.slots.len()
    }

    /// Empty every slot. Returns the bytes that were charged.
    pub fn clear(&mut self) -> u64 {
        let freed = self.occupied_bytes();
        self.slots.clear();
        freed
    }

    fn occupants(&self) -> impl Iterator<Item = &Occupant> {
        self.slots.iter().filter_map(|slot| match slot {
            Slot::Occupied(occ) => Some(occ),
            Slot::Empty => None,
        })
    }

    fn find_mut(&mut self, id: SlotId) -> Option<&mut Occupant> {
        self.slots.iter_mut().find_map(|slot| match slot {
            Slot::Occupied(occ) if occ.id == id => Some(occ),
            _ => None,
        })
    }
}
