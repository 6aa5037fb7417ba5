//! # shmwall
//!
//! Cross-process cyclic barrier over OS shared memory.
//!
//! A fixed group of `m` independently scheduled worker processes rendezvous
//! at repeated checkpoints ("cycles") through a two-word control block held
//! in a shared memory segment. The workers are separate address spaces, not
//! threads, so in-process locks do not apply; the segment is the only shared
//! state and all coordination is polling over it.
//!
//! - **Memory**: [`ShmSegment`] - a named, zero-initialized region of 32-bit
//!   words; created by a coordinator, attached by workers, released by the
//!   creator on drop.
//! - **Barrier**: [`CyclicBarrier`] - strict rank-ordered arrival, reusable
//!   across an unbounded number of cycles, no timeout or liveness detection.
//! - **Validation**: [`validate`] - the checks a driver program runs before
//!   the core ever sees its two integers. The core never inspects them.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use shmwall::{CyclicBarrier, WallResult};
//!
//! fn worker(rank: u32, workers: u32) -> WallResult<()> {
//!     let barrier = CyclicBarrier::attach("job42", workers)?;
//!     for _phase in 0..3 {
//!         // ... compute one phase ...
//!         barrier.wait(rank);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! The coordinating process creates the barrier with
//! [`CyclicBarrier::create`] before spawning any worker and keeps the handle
//! alive until the run ends (the creator unlinks the segment on drop).

pub mod barrier;
pub mod error;
pub mod memory;
pub mod validate;

pub use barrier::{CyclicBarrier, BARRIER_WORDS};
pub use error::{WallError, WallResult};
pub use memory::segment::ShmSegment;
