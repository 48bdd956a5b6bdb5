use chrono::{DateTime, Duration, Utc};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Issue instant {instant} is outside the accepted window [{earliest}, {latest}]")]
pub struct SkewError {
    pub instant: DateTime<Utc>,
    pub earliest: DateTime<Utc>,
    pub latest: DateTime<Utc>,
}

/// Accepts `instant` when it lies in `[now - before, now + after]`, bounds
/// included.
pub fn validate_skew(
    instant: DateTime<Utc>,
    now: DateTime<Utc>,
    before: Duration,
    after: Duration,
) -> Result<(), SkewError> {
    let earliest = now - before;
    let latest = now + after;
    if instant < earliest || instant > latest {
        tracing::warn!(%instant, %earliest, %latest, "Message outside clock skew window");
        return Err(SkewError {
            instant,
            earliest,
            latest,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: i64) -> Duration {
        Duration::milliseconds(n)
    }

    #[test]
    fn test_window_boundaries() {
        let now = Utc::now();
        let (before, after) = (ms(60_000), ms(30_000));

        assert!(validate_skew(now, now, before, after).is_ok());
        assert!(validate_skew(now - before, now, before, after).is_ok());
        assert!(validate_skew(now + after, now, before, after).is_ok());
        assert!(validate_skew(now - before + ms(1), now, before, after).is_ok());
        assert!(validate_skew(now + after - ms(1), now, before, after).is_ok());

        assert!(validate_skew(now - before - ms(1), now, before, after).is_err());
        let err = validate_skew(now + after + ms(1), now, before, after).unwrap_err();
        assert_eq!(err.latest, now + after);
    }

    #[test]
    fn test_zero_window() {
        let now = Utc::now();
        assert!(validate_skew(now, now, ms(0), ms(0)).is_ok());
        assert!(validate_skew(now + ms(1), now, ms(0), ms(0)).is_err());
    }
}
