//! Order book: seqlock best-bid/ask store with update signalling
//!
//! One cache-line slot per symbol. Writers bump an even/odd sequence
//! counter around each store so readers can detect a concurrent write and
//! retry; the read path is wait-free and takes no locks. Prices travel as
//! f64 bit-patterns through `AtomicU64` so no single field can tear; the
//! sequence check only has to protect the bid/ask *pair*.
//!
//! Writes to different slots may run concurrently; writes to the same slot
//! must be serialized by the caller (one feed connection per symbol).

use std::sync::atomic::{fence, AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::core::bitmap::UpdateBitmap;
use crate::core::symbol::{SymbolId, MAX_SYMBOLS};

/// Best bid/ask pair. Zero means "unknown / invalid".
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Quote {
    pub bid: f64,
    pub ask: f64,
}

/// Cache-line aligned price slot with sequence lock
#[repr(align(64))]
struct PriceSlot {
    seq: AtomicU64,
    bid: AtomicU64,
    ask: AtomicU64,
}

impl PriceSlot {
    fn new() -> Self {
        Self {
            seq: AtomicU64::new(0),
            bid: AtomicU64::new(0f64.to_bits()),
            ask: AtomicU64::new(0f64.to_bits()),
        }
    }
}

/// Update signalling block: bitmap + condvar + lock-free fast-path flag
struct UpdateSignal {
    state: Mutex<SignalState>,
    cv: Condvar,
    has_updates: AtomicBool,
}

struct SignalState {
    bits: UpdateBitmap,
    pending: bool,
}

impl UpdateSignal {
    fn new() -> Self {
        Self {
            state: Mutex::new(SignalState {
                bits: UpdateBitmap::new(),
                pending: false,
            }),
            cv: Condvar::new(),
            has_updates: AtomicBool::new(false),
        }
    }

    fn raise(&self, id: SymbolId) {
        // Flag before mutex so spinners see it without contending the lock
        self.has_updates.store(true, Ordering::Release);
        {
            let mut st = self.state.lock();
            st.bits.set(id);
            st.pending = true;
        }
        self.cv.notify_one();
    }

    fn take(&self, st: &mut SignalState) -> UpdateBitmap {
        let out = st.bits;
        st.bits.clear_all();
        st.pending = false;
        self.has_updates.store(false, Ordering::Release);
        out
    }
}

/// High-performance top-of-book price store
pub struct OrderBook {
    slots: Box<[PriceSlot]>,
    signal: UpdateSignal,
}

impl OrderBook {
    pub fn new() -> Self {
        let slots: Vec<PriceSlot> = (0..MAX_SYMBOLS).map(|_| PriceSlot::new()).collect();
        Self {
            slots: slots.into_boxed_slice(),
            signal: UpdateSignal::new(),
        }
    }

    /// Write a quote (hot path)
    ///
    /// Partial update rule: a zero component leaves the stored value
    /// unchanged (bid-only or ask-only refresh). Both zero is a no-op and
    /// raises no update bit.
    pub fn update(&self, id: SymbolId, bid: f64, ask: f64) {
        if bid == 0.0 && ask == 0.0 {
            return;
        }

        let slot = &self.slots[id.index()];

        let seq = slot.seq.load(Ordering::Relaxed);
        slot.seq.store(seq.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        if bid > 0.0 {
            slot.bid.store(bid.to_bits(), Ordering::Relaxed);
        }
        if ask > 0.0 {
            slot.ask.store(ask.to_bits(), Ordering::Relaxed);
        }

        slot.seq.store(seq.wrapping_add(2), Ordering::Release);

        self.signal.raise(id);
    }

    /// Read a quote (hot path, wait-free)
    ///
    /// Returns a pair seen between two consecutive writes of this slot,
    /// never a torn mix of bid and ask from different writes.
    #[inline]
    pub fn get(&self, id: SymbolId) -> Quote {
        let slot = &self.slots[id.index()];

        loop {
            let s1 = slot.seq.load(Ordering::Acquire);
            if s1 & 1 == 1 {
                // Writer in progress
                std::hint::spin_loop();
                continue;
            }

            let bid = f64::from_bits(slot.bid.load(Ordering::Relaxed));
            let ask = f64::from_bits(slot.ask.load(Ordering::Relaxed));

            fence(Ordering::Acquire);
            let s2 = slot.seq.load(Ordering::Relaxed);
            if s1 == s2 {
                return Quote { bid, ask };
            }
        }
    }

    /// Batch-read three slots (cycle evaluation)
    ///
    /// Prefetches all three lines before reading. The result is three
    /// independently consistent quotes, not a globally atomic snapshot.
    #[inline]
    pub fn get_triple(&self, id0: SymbolId, id1: SymbolId, id2: SymbolId) -> (Quote, Quote, Quote) {
        #[cfg(target_arch = "x86_64")]
        unsafe {
            use std::arch::x86_64::{_mm_prefetch, _MM_HINT_T0};
            _mm_prefetch(&self.slots[id0.index()] as *const PriceSlot as *const i8, _MM_HINT_T0);
            _mm_prefetch(&self.slots[id1.index()] as *const PriceSlot as *const i8, _MM_HINT_T0);
            _mm_prefetch(&self.slots[id2.index()] as *const PriceSlot as *const i8, _MM_HINT_T0);
        }
        (self.get(id0), self.get(id1), self.get(id2))
    }

    /// Block until any update bit is set, then snapshot-and-clear
    pub fn wait_for_updates(&self) -> UpdateBitmap {
        let mut st = self.signal.state.lock();
        while !st.pending {
            self.signal.cv.wait(&mut st);
        }
        self.signal.take(&mut st)
    }

    /// Blocking wait with a timeout so the owner can check a shutdown flag
    ///
    /// Returns an empty bitmap on timeout.
    pub fn wait_for_updates_timeout(&self, timeout: Duration) -> UpdateBitmap {
        let mut st = self.signal.state.lock();
        if !st.pending {
            let _ = self.signal.cv.wait_for(&mut st, timeout);
        }
        if !st.pending {
            return UpdateBitmap::new();
        }
        self.signal.take(&mut st)
    }

    /// Busy-poll with pause hints, reading the atomic flag lock-free
    ///
    /// On spin exhaustion falls back to a timed blocking wait so shutdown
    /// checks stay prompt. `fallback = Duration::ZERO` returns immediately
    /// after the spin budget (pure polling).
    pub fn wait_for_updates_spin(&self, max_spins: u32, fallback: Duration) -> UpdateBitmap {
        for _ in 0..max_spins {
            if self.signal.has_updates.load(Ordering::Acquire) {
                let mut st = self.signal.state.lock();
                if st.pending {
                    return self.signal.take(&mut st);
                }
            }
            std::hint::spin_loop();
        }
        self.wait_for_updates_timeout(fallback)
    }

    /// Non-blocking snapshot-and-clear; empty when nothing is pending
    pub fn consume_updates(&self) -> UpdateBitmap {
        let mut st = self.signal.state.lock();
        if !st.pending {
            return UpdateBitmap::new();
        }
        self.signal.take(&mut st)
    }

    pub fn has_updates(&self) -> bool {
        self.signal.has_updates.load(Ordering::Acquire)
    }
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[test]
    fn test_slot_is_cache_line_sized() {
        assert_eq!(std::mem::size_of::<PriceSlot>(), 64);
        assert_eq!(std::mem::align_of::<PriceSlot>(), 64);
    }

    #[test]
    fn test_unwritten_slot_reads_zero() {
        let book = OrderBook::new();
        let q = book.get(SymbolId::from_raw(17));
        assert_eq!(q, Quote { bid: 0.0, ask: 0.0 });
    }

    #[test]
    fn test_update_and_get() {
        let book = OrderBook::new();
        let id = SymbolId::from_raw(3);

        book.update(id, 50_000.0, 50_001.0);
        let q = book.get(id);
        assert_eq!(q.bid, 50_000.0);
        assert_eq!(q.ask, 50_001.0);
    }

    #[test]
    fn test_partial_update_keeps_other_side() {
        let book = OrderBook::new();
        let id = SymbolId::from_raw(5);

        book.update(id, 100.0, 101.0);
        book.update(id, 99.5, 0.0); // bid-only refresh
        let q = book.get(id);
        assert_eq!(q.bid, 99.5);
        assert_eq!(q.ask, 101.0);

        book.update(id, 0.0, 100.5); // ask-only refresh
        let q = book.get(id);
        assert_eq!(q.bid, 99.5);
        assert_eq!(q.ask, 100.5);
    }

    #[test]
    fn test_zero_zero_is_noop() {
        let book = OrderBook::new();
        let id = SymbolId::from_raw(9);
        book.update(id, 0.0, 0.0);
        assert!(!book.has_updates());
        assert!(!book.consume_updates().any());
    }

    #[test]
    fn test_get_triple() {
        let book = OrderBook::new();
        let (a, b, c) = (
            SymbolId::from_raw(0),
            SymbolId::from_raw(1),
            SymbolId::from_raw(2),
        );
        book.update(a, 1.0, 2.0);
        book.update(b, 3.0, 4.0);
        book.update(c, 5.0, 6.0);

        let (qa, qb, qc) = book.get_triple(a, b, c);
        assert_eq!((qa.bid, qa.ask), (1.0, 2.0));
        assert_eq!((qb.bid, qb.ask), (3.0, 4.0));
        assert_eq!((qc.bid, qc.ask), (5.0, 6.0));
    }

    #[test]
    fn test_consume_updates_snapshots_and_clears() {
        let book = OrderBook::new();
        book.update(SymbolId::from_raw(10), 1.0, 2.0);
        book.update(SymbolId::from_raw(20), 3.0, 4.0);

        let bits = book.consume_updates();
        assert!(bits.test(SymbolId::from_raw(10)));
        assert!(bits.test(SymbolId::from_raw(20)));
        assert_eq!(bits.count_ones(), 2);

        // Second consume is empty (idempotent)
        assert!(!book.consume_updates().any());
        assert!(!book.has_updates());
    }

    #[test]
    fn test_timed_wait_times_out_empty() {
        let book = OrderBook::new();
        let bits = book.wait_for_updates_timeout(Duration::from_millis(10));
        assert!(!bits.any());
    }

    #[test]
    fn test_blocking_wait_wakes_on_update() {
        let book = Arc::new(OrderBook::new());
        let writer_book = Arc::clone(&book);

        let writer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            writer_book.update(SymbolId::from_raw(42), 7.0, 8.0);
        });

        let bits = book.wait_for_updates();
        assert!(bits.test(SymbolId::from_raw(42)));
        writer.join().unwrap();
    }

    #[test]
    fn test_spin_wait_sees_update() {
        let book = Arc::new(OrderBook::new());
        book.update(SymbolId::from_raw(1), 1.0, 1.0);

        let bits = book.wait_for_updates_spin(100, Duration::ZERO);
        assert!(bits.test(SymbolId::from_raw(1)));
    }

    #[test]
    fn test_spin_exhaustion_returns_empty_with_zero_fallback() {
        let book = OrderBook::new();
        let bits = book.wait_for_updates_spin(64, Duration::ZERO);
        assert!(!bits.any());
    }

    /// Seqlock tear avoidance: a reader never observes a mixed pair.
    #[test]
    fn test_no_torn_reads() {
        let book = Arc::new(OrderBook::new());
        let id = SymbolId::from_raw(100);
        book.update(id, 1.0, 2.0);

        let stop = Arc::new(AtomicBool::new(false));

        let writer = {
            let book = Arc::clone(&book);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                let mut flip = false;
                while !stop.load(Ordering::Relaxed) {
                    if flip {
                        book.update(id, 1.0, 2.0);
                    } else {
                        book.update(id, 3.0, 4.0);
                    }
                    flip = !flip;
                }
            })
        };

        let mut reads = 0u64;
        while reads < 200_000 {
            let q = book.get(id);
            assert!(
                (q.bid == 1.0 && q.ask == 2.0) || (q.bid == 3.0 && q.ask == 4.0),
                "torn read: bid={} ask={}",
                q.bid,
                q.ask
            );
            reads += 1;
        }

        stop.store(true, Ordering::Relaxed);
        writer.join().unwrap();
    }
}

// Hot path checklist verified:
// ✓ No heap allocations on update() or get()
// ✓ No locks on the read path (seqlock retry only)
// ✓ Slots cache-line aligned (64 bytes) - no false sharing
// ✓ Bitmap snapshot is a fixed-size copy, consumption idempotent
