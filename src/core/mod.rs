/*!
 * Core Module
 * Shared types and engine-wide constants
 */

pub mod limits;
pub mod types;

// Re-export for convenience
pub use types::{local_machine, Machine, Pid};
