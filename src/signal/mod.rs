// Signal lifecycle
// Start, renew, stop and status of a user's own visibility window, plus the
// derived pieces the console builds on top: the countdown and the
// fail-open visible-set reader.

pub mod countdown;
pub mod manager;
pub mod types;
pub mod visible;

pub use countdown::{Countdown, CountdownState, format_remaining};
pub use manager::SignalManager;
pub use types::{
    ALLOWED_DURATIONS_MIN, DEFAULT_DURATION_MIN, LocationFix, SignalStatus, simple_geohash,
};
pub use visible::VisibleSetReader;
