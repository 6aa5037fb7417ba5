//! Cross-process cyclic barrier over a shared memory control block.
//!
//! A fixed group of `m` independently scheduled processes rendezvous at
//! repeated checkpoints. The control block is two 32-bit words at the start
//! of a [`ShmSegment`]: `arrivals` counts check-ins for the cycle in
//! progress and `generation` counts completed cycles.
//!
//! Arrival is strictly rank-ordered: rank `r` records its arrival only after
//! rank `r - 1` has recorded its own in the same cycle. The ordering
//! serializes the shared counter, so exactly one process writes the control
//! block at any instant, at the cost of turning arrival into an O(m) chain.
//!
//! All waiting is polling with interposed sleep, never a kernel block. There
//! is no timeout and no liveness detection: a participant that never shows
//! up leaves every peer spinning until the process group is torn down
//! externally. That is a property of the design, not an oversight.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

use crate::error::{WallError, WallResult};
use crate::memory::segment::ShmSegment;

/// Number of segment words occupied by the barrier control block.
pub const BARRIER_WORDS: usize = 2;

/// Poll interval while waiting for one's rank-ordered turn to arrive. This
/// wait is typically brief, bounded by how quickly lower ranks show up.
const TURN_POLL: Duration = Duration::from_micros(100);

/// Poll interval while waiting for the cycle to be released. This wait can
/// span an entire computational phase, so it is an order of magnitude
/// coarser than the turn poll.
const RELEASE_POLL: Duration = Duration::from_millis(1);

/// Barrier control block, laid out at words 0..2 of the segment.
///
/// Field order is part of the cross-process contract: `arrivals` at word 0,
/// `generation` at word 1.
#[repr(C)]
struct BarrierState {
    /// Processes that have checked in during the cycle in progress. Always
    /// in `0..=participants`; reset to 0 by the last arrival of each cycle.
    arrivals: AtomicU32,
    /// Completed cycles. Advances by exactly 1 when the last participant of
    /// a cycle arrives, wrapping on overflow.
    generation: AtomicU32,
}

/// Reusable rendezvous point for a fixed group of worker processes.
///
/// The coordinator calls [`CyclicBarrier::create`] before spawning workers
/// and keeps the handle alive until the run ends; each worker calls
/// [`CyclicBarrier::attach`] with the same name and participant count, then
/// [`CyclicBarrier::wait`] with its own fixed rank at every phase boundary.
pub struct CyclicBarrier {
    state: NonNull<BarrierState>,
    participants: u32,
    // Keeps the mapping (and, for the creator, the segment itself) alive for
    // as long as the state pointer is reachable.
    segment: ShmSegment,
}

// SAFETY: `state` points into the OS shared memory held by `segment`, which
// lives as long as the barrier; all access to it is atomic.
unsafe impl Send for CyclicBarrier {}
// SAFETY: see above.
unsafe impl Sync for CyclicBarrier {}

impl CyclicBarrier {
    /// Create the barrier segment with both counters at zero.
    ///
    /// Called once by the coordinating process, before any worker exists.
    pub fn create(name: &str, participants: u32) -> WallResult<Self> {
        let segment = ShmSegment::create(name, BARRIER_WORDS)?;
        Self::over_segment(segment, participants)
    }

    /// Attach to a barrier previously created under `name`.
    ///
    /// Every process in the group must pass the same `participants` count;
    /// the count cannot change for the lifetime of the barrier.
    pub fn attach(name: &str, participants: u32) -> WallResult<Self> {
        let segment = ShmSegment::attach(name, BARRIER_WORDS)?;
        Self::over_segment(segment, participants)
    }

    fn over_segment(segment: ShmSegment, participants: u32) -> WallResult<Self> {
        if participants == 0 {
            return Err(WallError::invalid_input(
                "barrier needs at least one participant",
            ));
        }
        debug_assert!(segment.words() >= BARRIER_WORDS);
        let state = NonNull::from(segment.word(0)).cast::<BarrierState>();
        Ok(Self {
            state,
            participants,
            segment,
        })
    }

    #[inline]
    fn state(&self) -> &BarrierState {
        // SAFETY: `state` points at BARRIER_WORDS words of mapped shared
        // memory owned by `self.segment`, valid for the life of `self`; the
        // #[repr(C)] block matches that layout exactly.
        unsafe { self.state.as_ref() }
    }

    /// Wait (by polling) until every participant has arrived at this
    /// rendezvous point, then return. The barrier is immediately reusable
    /// for the next cycle.
    ///
    /// `rank` is this process's fixed identity in `[0, participants)`.
    /// Arrival is strictly rank-ordered: the call records its own arrival
    /// only once every lower rank has recorded theirs for the current cycle.
    ///
    /// There is no error path and no timeout. If a peer never arrives, this
    /// call spins indefinitely.
    ///
    /// # Panics
    ///
    /// Panics if `rank` is out of range for the participant count.
    pub fn wait(&self, rank: u32) {
        assert!(
            rank < self.participants,
            "rank {} out of range for {} participants",
            rank,
            self.participants
        );
        // A single participant can never block on itself; skip the state
        // block entirely.
        if self.participants == 1 {
            return;
        }

        let state = self.state();

        // Snapshot before anything else: the generation advance is the only
        // release signal, and the snapshot is what distinguishes "not yet
        // arrived this cycle" from "arrived, waiting for release".
        let local_generation = state.generation.load(Ordering::Acquire);

        // Arrival phase: wait until every lower rank has checked in.
        while state.arrivals.load(Ordering::Acquire) != rank {
            thread::sleep(TURN_POLL);
        }

        state.arrivals.store(rank + 1, Ordering::Release);

        if rank == self.participants - 1 {
            // Last arrival of the cycle. Nobody else touches the control
            // block at this instant: all peers have arrived and are polling
            // `generation`. Reset the arrival count for the next cycle,
            // then publish the release.
            state.arrivals.store(0, Ordering::Release);
            state.generation.fetch_add(1, Ordering::Release);
        }

        // Release phase: every participant, the releaser included, holds
        // here until the advance is observed. Looping back into the next
        // cycle's arrival phase before all peers have seen the release
        // would corrupt the next cycle's arrival count.
        while state.generation.load(Ordering::Acquire) == local_generation {
            thread::sleep(RELEASE_POLL);
        }
    }

    /// Check-ins recorded for the cycle in progress.
    pub fn arrivals(&self) -> u32 {
        self.state().arrivals.load(Ordering::Acquire)
    }

    /// Completed cycles since the barrier was created.
    pub fn generation(&self) -> u32 {
        self.state().generation.load(Ordering::Acquire)
    }

    /// The fixed participant count this barrier was constructed with.
    pub fn participants(&self) -> u32 {
        self.participants
    }

    /// Name of the underlying segment.
    pub fn name(&self) -> &str {
        self.segment.name()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::time::Instant;

    fn unique_name(prefix: &str) -> String {
        format!(
            "{}_{}_{}",
            prefix,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        )
    }

    #[test]
    fn single_participant_never_polls() {
        let name = unique_name("wall_m1");
        // Poison the control block first: with one participant, wait must
        // return without even reading it.
        let seg = ShmSegment::create(&name, BARRIER_WORDS).expect("create");
        seg.word(0).store(7, Ordering::Relaxed);
        seg.word(1).store(42, Ordering::Relaxed);

        let barrier = CyclicBarrier::attach(&name, 1).expect("attach");
        let start = Instant::now();
        for _ in 0..100 {
            barrier.wait(0);
        }
        assert!(
            start.elapsed() < Duration::from_millis(50),
            "m == 1 wait must not poll"
        );
        assert_eq!(barrier.arrivals(), 7, "state must be untouched");
        assert_eq!(barrier.generation(), 42, "state must be untouched");
    }

    #[test]
    fn zero_participants_rejected() {
        let name = unique_name("wall_m0");
        assert!(CyclicBarrier::create(&name, 0).is_err());
    }

    #[test]
    fn attach_missing_rejected() {
        let name = unique_name("wall_gone");
        assert!(CyclicBarrier::attach(&name, 2).is_err());
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn out_of_range_rank_panics() {
        let name = unique_name("wall_badrank");
        let barrier = CyclicBarrier::create(&name, 2).expect("create");
        barrier.wait(5);
    }

    /// Scenario A: m=4, ranks arrive 0,1,2,3; one full cycle.
    #[test]
    fn full_cycle_in_rank_order() {
        let name = unique_name("wall_cycle");
        let coordinator = CyclicBarrier::create(&name, 4).expect("create");

        let workers: Vec<_> = (0..4u32)
            .map(|rank| {
                let name = name.clone();
                thread::spawn(move || {
                    let barrier = CyclicBarrier::attach(&name, 4).expect("attach");
                    barrier.wait(rank);
                })
            })
            .collect();
        for w in workers {
            w.join().expect("worker panicked");
        }

        assert_eq!(coordinator.generation(), 1);
        assert_eq!(coordinator.arrivals(), 0);
    }

    /// Scenario B: m=3, call order 0,2,1. Rank 2 blocks until rank 1 has
    /// arrived and never corrupts the control block while blocked.
    #[test]
    fn out_of_order_arrival_blocks() {
        let name = unique_name("wall_order");
        let coordinator = CyclicBarrier::create(&name, 3).expect("create");

        let spawn_rank = |rank: u32, done: Arc<AtomicBool>| {
            let name = name.clone();
            thread::spawn(move || {
                let barrier = CyclicBarrier::attach(&name, 3).expect("attach");
                barrier.wait(rank);
                done.store(true, Ordering::Release);
            })
        };

        let done0 = Arc::new(AtomicBool::new(false));
        let done2 = Arc::new(AtomicBool::new(false));
        let t0 = spawn_rank(0, done0.clone());
        thread::sleep(Duration::from_millis(50));
        let t2 = spawn_rank(2, done2.clone());
        thread::sleep(Duration::from_millis(100));

        // Rank 0 has arrived and is pending release; rank 2 is waiting for
        // its turn. Neither may have completed, and the arrival count must
        // still read exactly 1.
        assert!(!done0.load(Ordering::Acquire), "rank 0 released early");
        assert!(!done2.load(Ordering::Acquire), "rank 2 released early");
        assert_eq!(coordinator.arrivals(), 1);
        assert_eq!(coordinator.generation(), 0);

        let done1 = Arc::new(AtomicBool::new(false));
        let t1 = spawn_rank(1, done1.clone());
        for t in [t0, t1, t2] {
            t.join().expect("worker panicked");
        }

        assert_eq!(coordinator.generation(), 1);
        assert_eq!(coordinator.arrivals(), 0);
    }

    /// Scenario D: m=2 driven through 100 consecutive cycles.
    #[test]
    fn hundred_cycles_reusable() {
        let name = unique_name("wall_d");
        let coordinator = CyclicBarrier::create(&name, 2).expect("create");

        let workers: Vec<_> = (0..2u32)
            .map(|rank| {
                let name = name.clone();
                thread::spawn(move || {
                    let barrier = CyclicBarrier::attach(&name, 2).expect("attach");
                    for _ in 0..100 {
                        barrier.wait(rank);
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().expect("worker panicked");
        }

        assert_eq!(coordinator.generation(), 100);
        assert_eq!(coordinator.arrivals(), 0);
    }

    /// Generation advances by exactly one per completed cycle, k times.
    #[test]
    fn generation_counts_cycles() {
        let name = unique_name("wall_k");
        let coordinator = CyclicBarrier::create(&name, 3).expect("create");
        let cycles = 5u32;

        let workers: Vec<_> = (0..3u32)
            .map(|rank| {
                let name = name.clone();
                thread::spawn(move || {
                    let barrier = CyclicBarrier::attach(&name, 3).expect("attach");
                    for cycle in 0..cycles {
                        barrier.wait(rank);
                        // Every participant observes the same post-release
                        // generation for the cycle it just completed.
                        assert!(barrier.generation() >= cycle + 1);
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().expect("worker panicked");
        }

        assert_eq!(coordinator.generation(), cycles);
        assert_eq!(coordinator.arrivals(), 0);
    }

    /// The releaser's reset is visible before any peer re-enters the next
    /// cycle: per-rank scratch counters never drift apart by more than one
    /// cycle.
    #[test]
    fn release_orders_next_cycle() {
        let name = unique_name("wall_drift");
        let scratch_name = unique_name("wall_drift_scratch");
        let m = 3u32;
        let coordinator = CyclicBarrier::create(&name, m).expect("create");
        let scratch = ShmSegment::create(&scratch_name, m as usize).expect("scratch");

        let workers: Vec<_> = (0..m)
            .map(|rank| {
                let name = name.clone();
                let scratch_name = scratch_name.clone();
                thread::spawn(move || {
                    let barrier = CyclicBarrier::attach(&name, m).expect("attach");
                    let scratch = ShmSegment::attach(&scratch_name, m as usize).expect("attach");
                    for cycle in 0..20u32 {
                        scratch
                            .word(rank as usize)
                            .store(cycle + 1, Ordering::Release);
                        barrier.wait(rank);
                        for peer in 0..m {
                            let seen = scratch.word(peer as usize).load(Ordering::Acquire);
                            assert!(
                                seen == cycle + 1 || seen == cycle + 2,
                                "rank {} saw peer {} at cycle {} after release of cycle {}",
                                rank,
                                peer,
                                seen,
                                cycle
                            );
                        }
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().expect("worker panicked");
        }

        assert_eq!(coordinator.generation(), 20);
        assert_eq!(scratch.word(0).load(Ordering::Acquire), 20);
    }
}
