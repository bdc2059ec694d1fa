/*!
 * Core Module
 * Thread identity, limits, error taxonomy and the synchronization primitives
 */

pub mod errors;
pub mod id;
pub mod limits;
pub mod sync;

// Re-export for convenience
pub use errors::*;
pub use id::{current_thread_id, ThreadId};
