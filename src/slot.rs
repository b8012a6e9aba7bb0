use std::sync::{Mutex, MutexGuard, PoisonError};

/// Counters kept alongside a slot's value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotStats {
    /// Values written by the producer.
    pub written: u64,
    /// Values handed to the consumer.
    pub consumed: u64,
    /// Fresh values replaced before anyone read them.
    pub overwritten: u64,
}

struct SlotState<T> {
    value: Option<T>,
    fresh: bool,
    stats: SlotStats,
}

/// Single-value exchange cell between a producer callback and a consumer.
///
/// A write replaces the stored value and marks it fresh. A read of a fresh
/// value moves it out and clears the flag. Both happen under a lock that is
/// held only for the swap itself; building the value and dropping the
/// replaced one happen outside it.
pub struct FrameSlot<T> {
    state: Mutex<SlotState<T>>,
}

impl<T> FrameSlot<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                value: None,
                fresh: false,
                stats: SlotStats::default(),
            }),
        }
    }

    /// Store `value` and mark it fresh. Never fails.
    pub fn write(&self, value: T) {
        let replaced = {
            let mut state = self.lock_state();
            if state.fresh {
                state.stats.overwritten += 1;
            }
            state.stats.written += 1;
            state.fresh = true;
            state.value.replace(value)
        };
        drop(replaced);
    }

    /// Take the value if it has not been read since the last write.
    pub fn try_read(&self) -> Option<T> {
        self.lock().take()
    }

    pub fn is_fresh(&self) -> bool {
        self.lock_state().fresh
    }

    pub fn stats(&self) -> SlotStats {
        self.lock_state().stats
    }

    /// Hold the slot lock, for callers that must inspect several slots
    /// before deciding which to consume.
    pub fn lock(&self) -> SlotGuard<'_, T> {
        SlotGuard {
            state: self.lock_state(),
        }
    }

    // A panic while holding the lock cannot leave a half-written value:
    // every mutation is a whole-value swap plus flag update.
    fn lock_state(&self) -> MutexGuard<'_, SlotState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Default for FrameSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive access to one slot.
pub struct SlotGuard<'a, T> {
    state: MutexGuard<'a, SlotState<T>>,
}

impl<T> SlotGuard<'_, T> {
    pub fn is_fresh(&self) -> bool {
        self.state.fresh
    }

    /// The fresh value, without consuming it.
    pub fn peek(&self) -> Option<&T> {
        if self.state.fresh {
            self.state.value.as_ref()
        } else {
            None
        }
    }

    /// Consume the fresh value, clearing the flag.
    pub fn take(&mut self) -> Option<T> {
        if !self.state.fresh {
            return None;
        }
        self.state.fresh = false;
        self.state.stats.consumed += 1;
        self.state.value.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_empty_slot_reads_nothing() {
        let slot: FrameSlot<u32> = FrameSlot::new();
        assert!(!slot.is_fresh());
        assert_eq!(slot.try_read(), None);
    }

    #[test]
    fn test_read_clears_fresh() {
        let slot = FrameSlot::new();
        slot.write(7u32);
        assert!(slot.is_fresh());
        assert_eq!(slot.try_read(), Some(7));
        assert!(!slot.is_fresh());
        assert_eq!(slot.try_read(), None);
    }

    #[test]
    fn test_latest_write_wins() {
        let slot = FrameSlot::new();
        slot.write(1u32);
        slot.write(2);
        slot.write(3);
        assert_eq!(slot.try_read(), Some(3));

        let stats = slot.stats();
        assert_eq!(stats.written, 3);
        assert_eq!(stats.overwritten, 2);
        assert_eq!(stats.consumed, 1);
    }

    #[test]
    fn test_peek_does_not_consume() {
        let slot = FrameSlot::new();
        slot.write(5u32);
        {
            let guard = slot.lock();
            assert_eq!(guard.peek(), Some(&5));
        }
        assert!(slot.is_fresh());
    }

    #[test]
    fn test_concurrent_reads_never_tear() {
        const LEN: usize = 4096;
        const WRITES: u32 = 2000;

        let slot = Arc::new(FrameSlot::<Vec<u32>>::new());
        let writer_slot = slot.clone();
        let writer = std::thread::spawn(move || {
            for i in 1..=WRITES {
                writer_slot.write(vec![i; LEN]);
            }
        });

        let mut last = 0;
        let mut reads = 0;
        loop {
            if let Some(v) = slot.try_read() {
                assert_eq!(v.len(), LEN);
                let first = v[0];
                assert!(v.iter().all(|&x| x == first), "torn read");
                assert!(first > last, "stale value {} after {}", first, last);
                last = first;
                reads += 1;
                if first == WRITES {
                    break;
                }
            } else if writer.is_finished() && !slot.is_fresh() {
                break;
            }
        }
        writer.join().unwrap();

        let stats = slot.stats();
        assert_eq!(stats.written, WRITES as u64);
        assert_eq!(stats.consumed, reads);
        assert_eq!(stats.written, stats.consumed + stats.overwritten);
    }
}
