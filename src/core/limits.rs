/*!
 * Engine Limits and Constants
 *
 * Centralized location for supervision timing, retry budgets, and buffer
 * limits. Organized by domain for maintainability and discoverability.
 */

use std::time::Duration;

// =============================================================================
// HEALTH CHECK (PING) LIMITS
// =============================================================================

/// Interval between ping cycles
pub const PING_INTERVAL: Duration = Duration::from_secs(2);

/// Bounded wait for a single ping reply
pub const PING_REPLY_TIMEOUT: Duration = Duration::from_millis(1500);

/// Unanswered ping attempts tolerated before a process is declared
/// non-responsive
pub const PING_RETRIES: u32 = 8;

// =============================================================================
// RETURNCODE MONITOR LIMITS
// =============================================================================

/// Poll cadence for native exit status
pub const RETURNCODE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Lines of captured stdout attached to a FAILED transition
pub const FAILURE_TAIL_LINES: usize = 15;

// =============================================================================
// TRANSPORT LIMITS
// =============================================================================

/// Default bound for a request/reply round trip
pub const REQUEST_TIMEOUT: Duration = Duration::from_millis(6000);

/// Bound for a kill_process round trip
pub const KILL_REQUEST_TIMEOUT: Duration = Duration::from_millis(5000);

/// Largest accepted wire frame; anything bigger is treated as corruption
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

// =============================================================================
// REGISTRATION LIMITS
// =============================================================================

/// Default deadline for a spawned process to register back
pub const REGISTER_TIMEOUT: Duration = Duration::from_secs(3);

// =============================================================================
// KILL LIMITS
// =============================================================================

/// Grace period between a polite termination request and an unconditional
/// kill signal on the escalating path
pub const KILL_GRACE_TIMEOUT: Duration = Duration::from_millis(100);

// =============================================================================
// I/O CAPTURE LIMITS
// =============================================================================

/// Captured stdout lines retained in memory per process
pub const STDOUT_TAIL_CAPACITY: usize = 256;

/// Default line count for tail requests
pub const DEFAULT_TAIL_LINES: usize = 15;
