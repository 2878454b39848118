use chrono::{DateTime, Duration, Utc};

use crate::signal::types::SignalStatus;

/// What a countdown tick observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownState {
    /// Not armed, nothing to display.
    Inactive,
    /// Deadline still ahead.
    Running { remaining: Duration },
    /// Deadline passed since the last tick. Reported once, then the
    /// countdown disarms itself.
    Expired,
}

/// Local countdown towards the stored expiry.
///
/// Purely advisory: it never stops a signal by itself, it only tells the
/// caller that the deadline passed so the caller can confirm against the
/// store. Re-arming from a fresh status read is always safe and is how the
/// display stays honest after restarts or writes from another device.
#[derive(Debug, Default)]
pub struct Countdown {
    deadline: Option<DateTime<Utc>>,
}

impl Countdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, expires_at: DateTime<Utc>) {
        self.deadline = Some(expires_at);
    }

    pub fn clear(&mut self) {
        self.deadline = None;
    }

    /// Re-derive the armed state from an authoritative status read.
    pub fn sync(&mut self, status: &SignalStatus) {
        match status {
            SignalStatus::Active { expires_at } => self.arm(*expires_at),
            SignalStatus::Inactive => self.clear(),
        }
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn tick(&mut self, now: DateTime<Utc>) -> CountdownState {
        match self.deadline {
            None => CountdownState::Inactive,
            Some(deadline) if deadline > now => CountdownState::Running {
                remaining: deadline - now,
            },
            Some(_) => {
                self.deadline = None;
                CountdownState::Expired
            }
        }
    }
}

/// Remaining time as the interface shows it, minutes unpadded and seconds
/// two-digit: `9:05`, `59:12`, `0:00`.
pub fn format_remaining(remaining: Duration) -> String {
    let total_secs = remaining.num_seconds().max(0);
    format!("{}:{:02}", total_secs / 60, total_secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn formats_minutes_and_padded_seconds() {
        assert_eq!(format_remaining(Duration::seconds(0)), "0:00");
        assert_eq!(format_remaining(Duration::seconds(59)), "0:59");
        assert_eq!(format_remaining(Duration::seconds(65)), "1:05");
        assert_eq!(format_remaining(Duration::seconds(600)), "10:00");
        assert_eq!(format_remaining(Duration::seconds(3599)), "59:59");
    }

    #[test]
    fn negative_remaining_clamps_to_zero() {
        assert_eq!(format_remaining(Duration::seconds(-30)), "0:00");
    }

    #[test]
    fn unarmed_countdown_ticks_inactive() {
        let mut countdown = Countdown::new();
        assert_eq!(countdown.tick(Utc::now()), CountdownState::Inactive);
    }

    #[test]
    fn running_then_expired_exactly_once() {
        let now = Utc::now();
        let mut countdown = Countdown::new();
        countdown.arm(now + Duration::seconds(90));

        assert_matches!(
            countdown.tick(now),
            CountdownState::Running { remaining } if remaining == Duration::seconds(90)
        );

        let later = now + Duration::seconds(91);
        assert_eq!(countdown.tick(later), CountdownState::Expired);
        assert_eq!(countdown.tick(later), CountdownState::Inactive);
    }

    #[test]
    fn sync_follows_status_reads() {
        let now = Utc::now();
        let mut countdown = Countdown::new();

        countdown.sync(&SignalStatus::Active {
            expires_at: now + Duration::minutes(10),
        });
        assert!(countdown.is_armed());

        countdown.sync(&SignalStatus::Inactive);
        assert!(!countdown.is_armed());
        assert_eq!(countdown.tick(now), CountdownState::Inactive);
    }
}
