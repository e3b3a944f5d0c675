//! Centralized default constants for the Lifeline system.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic numbers.

// =============================================================================
// PROXIMITY MATCHING
// =============================================================================

/// Search radius used when matching contacts to a new SOS (meters).
pub const MATCH_RADIUS_M: f64 = 100_000.0;

/// Maximum matched contacts persisted onto an SOS event.
pub const MATCH_LIMIT: usize = 5;

/// Deadline for the proximity queries run at SOS trigger time.
pub const MATCH_TIMEOUT_MS: u64 = 800;

/// Default radius for the public nearest-contacts lookup (meters).
pub const NEAREST_RADIUS_M: f64 = 50_000.0;

/// Default result count for the public nearest-contacts lookup.
pub const NEAREST_LIMIT: usize = 10;

/// Upper bound on any caller-supplied proximity limit.
pub const NEAREST_LIMIT_MAX: usize = 50;

// =============================================================================
// SOS EVENTS
// =============================================================================

/// Maximum length of the free-text incident description (characters).
pub const DESCRIPTION_MAX_LEN: usize = 1000;

/// Maximum length of resolution notes (characters).
pub const NOTES_MAX_LEN: usize = 2000;

/// Maximum family contacts accepted on a single SOS.
pub const FAMILY_CONTACTS_MAX: usize = 10;

/// Default page size for incident history.
pub const HISTORY_LIMIT: i64 = 20;

/// Largest page size for incident history and the admin board.
pub const HISTORY_LIMIT_MAX: i64 = 100;

// =============================================================================
// REAPER
// =============================================================================

/// Incidents left open longer than this are auto-cancelled.
pub const REAPER_THRESHOLD_HOURS: i64 = 48;

/// Largest accepted reaper threshold (ten years).
pub const REAPER_THRESHOLD_HOURS_MAX: i64 = 24 * 365 * 10;

/// Interval between reaper sweeps (seconds).
pub const REAPER_INTERVAL_SECS: u64 = 3600;

// =============================================================================
// NOTIFICATIONS
// =============================================================================

/// Default page size for the notification inbox.
pub const NOTIFICATION_PAGE_LIMIT: i64 = 50;

/// Timeout for a single outbound webhook delivery (seconds).
pub const WEBHOOK_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// SERVER
// =============================================================================

/// Default HTTP server port.
pub const SERVER_PORT: u16 = 3000;

/// Broadcast capacity for the in-process event bus.
pub const EVENT_BUS_CAPACITY: usize = 256;
