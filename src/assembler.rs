//! Multipart record reassembly.
//!
//! Several inbound record kinds arrive split across multiple frames:
//! concatenated SMS segments, cell broadcast pages, linear-fixed SIM file
//! records. [`Assembler`] collects the parts under a caller-chosen key and
//! hands back the concatenated payload once every part has arrived, in
//! index order regardless of arrival order.
//!
//! # Example
//!
//! ```
//! use modemwire::Assembler;
//!
//! let mut asm: Assembler<u16> = Assembler::new();
//! assert_eq!(asm.add_part(7, 2, 2, b"world".to_vec()).unwrap(), None);
//! let full = asm.add_part(7, 1, 2, b"hello ".to_vec()).unwrap().unwrap();
//! assert_eq!(&full[..], b"hello world");
//! ```

use std::collections::HashMap;
use std::hash::Hash;

use bytes::Bytes;

use crate::error::{Error, Result};

struct Slot {
    /// One entry per part, 1-based index mapped to position `index - 1`.
    parts: Vec<Option<Vec<u8>>>,
    received: usize,
}

/// Reassembles multipart records keyed by `K`.
///
/// Part indices are 1-based, matching the numbering used on the wire by
/// concatenation headers and broadcast page parameters.
pub struct Assembler<K> {
    slots: HashMap<K, Slot>,
}

impl<K: Eq + Hash + Clone> Assembler<K> {
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
        }
    }

    /// Number of records currently awaiting further parts.
    #[inline]
    pub fn pending(&self) -> usize {
        self.slots.len()
    }

    /// Record one part of a multipart payload.
    ///
    /// Returns the concatenated payload once all `total` parts are present,
    /// `None` while parts are still outstanding. An index outside
    /// `1..=total`, or a `total` that disagrees with the parts already held
    /// for this key, is a decode error. A duplicate index is ignored.
    pub fn add_part(
        &mut self,
        key: K,
        index: usize,
        total: usize,
        payload: Vec<u8>,
    ) -> Result<Option<Bytes>> {
        if index == 0 || index > total {
            return Err(Error::decode(format!(
                "part index {index} outside 1..={total}"
            )));
        }

        let slot = self.slots.entry(key.clone()).or_insert_with(|| Slot {
            parts: vec![None; total],
            received: 0,
        });
        if slot.parts.len() != total {
            return Err(Error::decode(format!(
                "part count changed from {} to {total}",
                slot.parts.len()
            )));
        }
        if slot.parts[index - 1].is_some() {
            tracing::debug!(index, total, "duplicate part ignored");
            return Ok(None);
        }
        slot.parts[index - 1] = Some(payload);
        slot.received += 1;
        if slot.received < total {
            return Ok(None);
        }

        // All parts present; this index filled the last gap.
        let slot = match self.slots.remove(&key) {
            Some(slot) => slot,
            None => return Ok(None),
        };
        let mut combined = Vec::new();
        for part in slot.parts.into_iter().flatten() {
            combined.extend_from_slice(&part);
        }
        Ok(Some(Bytes::from(combined)))
    }

    /// Abandon all partially assembled records.
    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

impl<K: Eq + Hash + Clone> Default for Assembler<K> {
    fn default() -> Self {
        Self::new()
    }
}
