//! Restores recorder order for segments drained from the page.
//!
//! The page numbers segments synchronously in `dataavailable` but encodes
//! them asynchronously, so a drain can return segment 5 before segment 4.

use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::warn;

/// One entry of the page-side outbound queue.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSegment {
    pub seq: u64,
    /// Base64 payload; absent when the segment was empty or failed to encode
    pub data: Option<String>,
    pub error: Option<String>,
    /// Milliseconds since the Unix epoch
    #[serde(default)]
    pub produced_at: Option<f64>,
}

#[derive(Debug, Default)]
pub struct ChunkSequencer {
    next_seq: u64,
    pending: BTreeMap<u64, PageSegment>,
}

impl ChunkSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, segment: PageSegment) {
        if segment.seq < self.next_seq || self.pending.contains_key(&segment.seq) {
            warn!("Dropping duplicate segment {}", segment.seq);
            return;
        }
        self.pending.insert(segment.seq, segment);
    }

    /// Segments that continue the sequence without a gap.
    pub fn pop_ready(&mut self) -> Vec<PageSegment> {
        let mut ready = Vec::new();
        while let Some(segment) = self.pending.remove(&self.next_seq) {
            self.next_seq += 1;
            ready.push(segment);
        }
        ready
    }

    /// Everything still held, in order, gaps included. Used once the
    /// recorder has stopped and no missing segment can still arrive.
    pub fn drain_all(&mut self) -> Vec<PageSegment> {
        let rest = std::mem::take(&mut self.pending);
        if let Some((&last, _)) = rest.iter().next_back() {
            if rest.len() as u64 != last + 1 - self.next_seq {
                warn!(
                    "Recorder segments missing between {} and {}",
                    self.next_seq, last
                );
            }
            self.next_seq = last + 1;
        }
        rest.into_values().collect()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
