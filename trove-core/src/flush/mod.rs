//! Deferred flush scheduling: the durable due index, the jobs in it and the
//! sweeper that recovers jobs whose timer was lost.

pub mod job;
pub mod scheduler;
pub mod sweeper;

pub use job::FlushJob;
pub use scheduler::FlushScheduler;
pub use sweeper::FlushSweeper;
