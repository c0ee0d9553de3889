//! Clock arithmetic that never panics.

use chrono::{DateTime, Duration, Utc};

/// `now + duration`, pinned to the representable range instead of overflowing.
pub fn saturating_add(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    match now.checked_add_signed(duration) {
        Some(at) => at,
        None if duration < Duration::zero() => DateTime::<Utc>::MIN_UTC,
        None => DateTime::<Utc>::MAX_UTC,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adds_in_range() {
        let now = Utc::now();
        assert_eq!(saturating_add(now, Duration::minutes(5)), now + Duration::minutes(5));
    }

    #[test]
    fn pins_to_the_ends_of_time() {
        let now = Utc::now();
        assert_eq!(saturating_add(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
        assert_eq!(saturating_add(now, Duration::MIN), DateTime::<Utc>::MIN_UTC);
    }
}
