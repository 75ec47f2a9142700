pub mod cpu;
pub mod epoch;
pub mod jitter;
pub mod scheduler;
pub mod spin;

pub use epoch::{DefaultEpoch, EpochSlot, SyncTier};
pub use scheduler::{run_worker, Harness, RunState};
pub use spin::SpinRegistry;
