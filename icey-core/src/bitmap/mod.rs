//! Bounded trust/distrust tally over a pair of byte bitmaps.
//!
//! `bm[i]` holds the vote value and `bmi[i]` marks slot `i` as recorded.
//! Slots are grouped in blocks of [`BLOCK_SIZE`]:
//!
//! - B0 `[0, 256)`: settled window, read first by [`stats`] and used for
//!   replacement once the buffer is saturated.
//! - B1 `[256, 512)`: staging, filled left to right.
//! - B2 `[512, 768)`: overflow judge. When B1 is full, B2 is either
//!   consolidated to all-trusted (enough trusted votes) or wiped.
//!
//! The footprint never grows with vote volume.

pub mod store;

pub use store::BitmapStore;

use crate::error::{IceyError, Result};
use serde::{Deserialize, Serialize};

pub const BLOCK_SIZE: usize = 256;

/// Minimum trusted votes in B2 for consolidation: `floor(256 * 0.8)`.
pub const CONSOLIDATION_THRESHOLD: usize = BLOCK_SIZE * 4 / 5;

/// Default on-disk size of each bitmap file.
pub const DEFAULT_BITMAP_SIZE: usize = 2 * BLOCK_SIZE;

const B0: usize = 0;
const B1: usize = BLOCK_SIZE;
const B2: usize = 2 * BLOCK_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Vote {
    Distrusted,
    Trusted,
}

impl Vote {
    pub fn bit(self) -> u8 {
        match self {
            Vote::Distrusted => 0,
            Vote::Trusted => 1,
        }
    }

    pub fn from_bit(bit: u8) -> Result<Self> {
        match bit {
            0 => Ok(Vote::Distrusted),
            1 => Ok(Vote::Trusted),
            other => Err(IceyError::InvalidRequest(format!(
                "vote must be 0 or 1, got {}",
                other
            ))),
        }
    }
}

/// What happened to the overflow block while placing a vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overflow {
    /// B1 had room; B2 untouched.
    None,
    /// B2 reached the threshold and was promoted to all-trusted.
    Consolidated,
    /// B2 fell short of the threshold and was cleared.
    Wiped,
}

/// Where the vote landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Written into an empty slot.
    Recorded { slot: usize, overflow: Overflow },
    /// Saturated buffer: overwrote an opposite vote in B0.
    Replaced { slot: usize, overflow: Overflow },
    /// Saturated buffer with no opposite vote in B0; buffers hold their
    /// post-overflow state and the vote itself left no trace.
    Absorbed { overflow: Overflow },
}

impl InsertOutcome {
    pub fn overflow(&self) -> Overflow {
        match *self {
            InsertOutcome::Recorded { overflow, .. }
            | InsertOutcome::Replaced { overflow, .. }
            | InsertOutcome::Absorbed { overflow } => overflow,
        }
    }
}

/// Place `vote` into the bitmap pair in place.
pub fn insert_vote(bm: &mut [u8], bmi: &mut [u8], vote: Vote) -> Result<InsertOutcome> {
    check_pair(bm, bmi)?;
    let len = bm.len();
    let value = vote.bit();

    // First free slot from B1 onwards.
    let mut pos = (B1..len).find(|&i| bmi[i] == 0).unwrap_or(len);
    let mut overflow = Overflow::None;

    if pos >= B2 {
        let b2 = B2.min(len)..(B2 + BLOCK_SIZE).min(len);
        let trusted = b2.clone().filter(|&i| bmi[i] == 1 && bm[i] == 1).count();

        if trusted >= CONSOLIDATION_THRESHOLD {
            for i in b2 {
                if bm[i] == 0 {
                    bm[i] = 1;
                    bmi[i] = 1;
                }
            }
            overflow = Overflow::Consolidated;
        } else {
            for i in b2 {
                bm[i] = 0;
                bmi[i] = 0;
            }
            overflow = Overflow::Wiped;
        }

        pos = B2;
    }

    if pos >= len {
        let opposite = 1 - value;
        let replacement = (B0..BLOCK_SIZE.min(len)).find(|&i| bmi[i] == 1 && bm[i] == opposite);

        return Ok(match replacement {
            Some(slot) => {
                bm[slot] = value;
                bmi[slot] = 1;
                InsertOutcome::Replaced { slot, overflow }
            }
            None => InsertOutcome::Absorbed { overflow },
        });
    }

    bm[pos] = value;
    bmi[pos] = 1;
    Ok(InsertOutcome::Recorded {
        slot: pos,
        overflow,
    })
}

/// Percentage of trusted votes, truncated.
///
/// Computed over B0 when it holds any vote, otherwise over B1; 0 when
/// neither has votes.
pub fn stats(bm: &[u8], bmi: &[u8]) -> u8 {
    let len = bm.len().min(bmi.len());

    let b0 = tally_range(bm, bmi, B0..BLOCK_SIZE.min(len));
    if b0.total > 0 {
        return b0.percent();
    }

    tally_range(bm, bmi, B1.min(len)..(B1 + BLOCK_SIZE).min(len)).percent()
}

/// Counts over every recorded slot of a pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub total: usize,
    pub trusted: usize,
    pub distrusted: usize,
}

impl Tally {
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        (self.trusted * 100 / self.total) as u8
    }
}

/// Tally over the whole pair, tolerating buffers of different length.
pub fn tally(bm: &[u8], bmi: &[u8]) -> Tally {
    let len = bm.len().min(bmi.len());
    tally_range(bm, bmi, 0..len)
}

fn tally_range(bm: &[u8], bmi: &[u8], range: std::ops::Range<usize>) -> Tally {
    let mut tally = Tally::default();
    for i in range {
        if bmi[i] == 1 {
            tally.total += 1;
            if bm[i] == 1 {
                tally.trusted += 1;
            } else {
                tally.distrusted += 1;
            }
        }
    }
    tally
}

fn check_pair(bm: &[u8], bmi: &[u8]) -> Result<()> {
    if bm.len() != bmi.len() {
        return Err(IceyError::Internal(format!(
            "bitmap length mismatch: bm={} bmi={}",
            bm.len(),
            bmi.len()
        )));
    }
    Ok(())
}
