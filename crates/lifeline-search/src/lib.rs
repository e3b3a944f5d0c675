//! # lifeline-search
//!
//! Proximity matching for the Lifeline emergency contact directory.
//!
//! This crate provides:
//! - [`ProximityMatcher`]: nearest active contacts to a point, optionally
//!   restricted by category or to always-available entries
//! - [`merge_ranked_contacts`]: the merge/dedup step used when an SOS is
//!   triggered
//!
//! ## Example
//!
//! ```ignore
//! use lifeline_search::ProximityMatcher;
//!
//! let matcher = ProximityMatcher::new(repos.contacts.clone());
//! let nearest = matcher
//!     .find_nearest(&point, 50_000.0, 10, Some(ContactCategory::Embassy))
//!     .await?;
//! ```

pub mod merge;
pub mod proximity;

pub use merge::merge_ranked_contacts;
pub use proximity::{rank_candidates, ProximityMatcher};
