use crate::slot::{FrameSlot, SlotStats};
use crate::types::{arrival_gap, ColorFrame, DepthFrame, SynchronizedPair};
use std::sync::Arc;
use std::time::Duration;

/// Consumer-side read path over a session's color and depth slots.
///
/// A pair is handed out only when both slots hold a fresh frame at the same
/// observation. If just one is fresh it is left in place for the next poll.
/// Never blocks beyond the two slot locks.
#[derive(Clone)]
pub struct FrameExchange {
    color: Arc<FrameSlot<ColorFrame>>,
    depth: Arc<FrameSlot<DepthFrame>>,
    max_skew: Option<Duration>,
}

/// Per-slot counters, as returned by [`FrameExchange::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExchangeStats {
    pub color: SlotStats,
    pub depth: SlotStats,
}

impl FrameExchange {
    pub fn new(color: Arc<FrameSlot<ColorFrame>>, depth: Arc<FrameSlot<DepthFrame>>) -> Self {
        Self {
            color,
            depth,
            max_skew: None,
        }
    }

    /// Bound the arrival gap between the two frames of a pair.
    ///
    /// When both slots are fresh but further apart than `max_skew`, the older
    /// frame is discarded and the newer one waits for a partner.
    pub fn with_max_skew(mut self, max_skew: Option<Duration>) -> Self {
        self.max_skew = max_skew;
        self
    }

    pub fn max_skew(&self) -> Option<Duration> {
        self.max_skew
    }

    /// Take the latest color and depth frames if both are fresh.
    pub fn try_acquire_pair(&self) -> Option<SynchronizedPair> {
        // Fixed lock order: color, then depth. Producers only ever hold one.
        let mut color = self.color.lock();
        let mut depth = self.depth.lock();

        let (c, d) = match (color.peek(), depth.peek()) {
            (Some(c), Some(d)) => (c.received_at, d.received_at),
            _ => return None,
        };

        if let Some(bound) = self.max_skew {
            let gap = arrival_gap(c, d);
            if gap > bound {
                let discarded = if c < d {
                    color.take().map(|f| f.sequence)
                } else {
                    depth.take().map(|f| f.sequence)
                };
                drop(depth);
                drop(color);
                log::debug!(
                    "Pair skew {:?} exceeds {:?}, discarded older frame seq={:?}",
                    gap,
                    bound,
                    discarded
                );
                return None;
            }
        }

        match (color.take(), depth.take()) {
            (Some(color), Some(depth)) => Some(SynchronizedPair { color, depth }),
            _ => None,
        }
    }

    pub fn stats(&self) -> ExchangeStats {
        ExchangeStats {
            color: self.color.stats(),
            depth: self.depth.stats(),
        }
    }
}
