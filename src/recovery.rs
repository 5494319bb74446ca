//! Boot time reconstruction of the committed state.
//!
//! 1. Both bank headers are read and checked against their CRC. Of the valid ones, the bank
//!    with the strictly greater sequence id is authoritative.
//! 2. The transaction area of that bank is scanned from its start. Every transaction whose
//!    record chain ends in a flagged record and whose CRC matches is applied in order.
//! 3. The scan stops at the first transaction that is torn, fails its CRC or runs into erased
//!    memory. That transaction and everything behind it is not committed state; its start becomes
//!    the write cursor.
//! 4. If not a single transaction of the authoritative bank survives and the other bank is valid,
//!    the other bank is replayed instead.

use crate::ItemId;
use crate::platform::FnCrc32;
use crate::raw::{BankHeader, BankSelector, CRC_SIZE, ITEM_HEADER_SIZE, ItemHeader, LAST_ITEM_ID};
#[cfg(feature = "defmt")]
use defmt::warn;

/// The authoritative bank and, if the other bank is valid as well, its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BankChoice {
    pub(crate) bank: BankSelector,
    pub(crate) header: BankHeader,
    pub(crate) fallback: Option<BankHeader>,
}

/// Picks the authoritative bank from the headers that passed their CRC check.
pub(crate) fn choose_bank(
    first: Option<BankHeader>,
    second: Option<BankHeader>,
) -> Option<BankChoice> {
    let choice = match (first, second) {
        (Some(first), Some(second)) => {
            if second.sequence_id > first.sequence_id {
                BankChoice {
                    bank: BankSelector::Second,
                    header: second,
                    fallback: Some(first),
                }
            } else {
                if second.sequence_id == first.sequence_id {
                    #[cfg(feature = "defmt")]
                    warn!("both banks carry sequence id {}", first.sequence_id);

                    #[cfg(feature = "debug-logs")]
                    println!("recovery: both banks carry sequence id {}", first.sequence_id);
                }
                BankChoice {
                    bank: BankSelector::First,
                    header: first,
                    fallback: Some(second),
                }
            }
        }
        (Some(first), None) => BankChoice {
            bank: BankSelector::First,
            header: first,
            fallback: None,
        },
        (None, Some(second)) => BankChoice {
            bank: BankSelector::Second,
            header: second,
            fallback: None,
        },
        (None, None) => return None,
    };
    Some(choice)
}

/// Outcome of scanning a transaction area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Replay {
    /// Number of applied transactions.
    pub(crate) transactions: usize,
    /// Offset behind the last applied transaction, relative to the start of the area.
    pub(crate) end: usize,
    /// Whether everything from `end` on is still erased.
    pub(crate) clean_tail: bool,
}

impl Replay {
    /// Not even the first transaction is intact, yet the area was written to.
    pub(crate) fn is_corrupted(&self) -> bool {
        self.transactions == 0 && !self.clean_tail
    }
}

/// Applies every committed record of `area` in order and reports where the journal ends.
pub(crate) fn replay<'a>(
    area: &'a [u8],
    crc32: FnCrc32,
    mut apply: impl FnMut(ItemId, &'a [u8]),
) -> Replay {
    let mut transactions = 0;
    let mut pos = 0;

    while let Some(len) = validate_transaction(&area[pos..], crc32) {
        let records = &area[pos..pos + len - CRC_SIZE];

        if is_end_marker(records) {
            break;
        }

        for (header, data) in Records(records) {
            apply(header.id, data);
        }

        transactions += 1;
        pos += len;
    }

    let clean_tail = area[pos..].iter().all(|&b| b == 0xFF);
    if !clean_tail {
        #[cfg(feature = "defmt")]
        warn!("journal tail at +{} is not erased, ignoring it", pos);

        #[cfg(feature = "debug-logs")]
        println!("recovery: journal tail at +{pos} is not erased, ignoring it");
    }

    Replay {
        transactions,
        end: pos,
        clean_tail,
    }
}

/// Returns the length of the transaction at the start of `buf`, including its CRC, if it is
/// complete and intact.
pub(crate) fn validate_transaction(buf: &[u8], crc32: FnCrc32) -> Option<usize> {
    let mut pos = 0;

    loop {
        let raw = buf.get(pos..pos + ITEM_HEADER_SIZE)?;
        if ItemHeader::is_erased(raw) {
            return None;
        }

        let header = ItemHeader::from_bytes([raw[0], raw[1], raw[2]]);
        pos += ITEM_HEADER_SIZE + header.len as usize;
        if pos > buf.len() {
            return None;
        }

        if header.last_item {
            let stored = buf.get(pos..pos + CRC_SIZE)?;
            let stored = u32::from_le_bytes([stored[0], stored[1], stored[2], stored[3]]);
            if stored != crc32(0, &buf[..pos]) {
                return None;
            }
            return Some(pos + CRC_SIZE);
        }
    }
}

// Journals written by older firmware terminate with a transaction holding just an empty record
// with the reserved end id.
fn is_end_marker(records: &[u8]) -> bool {
    records.len() == ITEM_HEADER_SIZE
        && ItemHeader::from_bytes([records[0], records[1], records[2]]).id == LAST_ITEM_ID
}

/// Iterates the records of an already validated transaction.
struct Records<'a>(&'a [u8]);

impl<'a> Iterator for Records<'a> {
    type Item = (ItemHeader, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.0.len() < ITEM_HEADER_SIZE {
            return None;
        }
        let header = ItemHeader::from_bytes([self.0[0], self.0[1], self.0[2]]);
        let (record, rest) = self.0.split_at(ITEM_HEADER_SIZE + header.len as usize);
        self.0 = rest;
        Some((header, &record[ITEM_HEADER_SIZE..]))
    }
}
