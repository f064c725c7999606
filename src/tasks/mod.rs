//! Background Tasks Module
//!
//! Contains background tasks that run for the lifetime of a cache instance.
//!
//! # Tasks
//! - Expiry Sweep: Removes expired local entries at a fixed interval

mod sweep;

pub use sweep::spawn_sweep_task;
