//! Identifier and time primitives shared by fetch tasks and observations.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Symbol`] | Validated listing code or disclosure-registry identifier |
//! | [`UtcDateTime`] | RFC3339 timestamp normalised to UTC |

mod symbol;
mod timestamp;

pub use symbol::Symbol;
pub use timestamp::UtcDateTime;
