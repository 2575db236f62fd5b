use crate::models::{Quality, ReviewKey, ReviewState, DEFAULT_EASINESS, DEFAULT_INTERVAL, MIN_EASINESS};
use chrono::{DateTime, Days, Utc};

/// Calculates the next review state from the prior one and a response.
///
/// `prior == None` means the key has never been answered and the seed
/// values (repetition 0, interval 1, easiness 2.5) are used.
///
/// The interval ladder is 1 day, 6 days, then `round(interval * easiness)`
/// using the easiness from *before* this response. Easiness is then updated
/// on both the pass and the fail path:
///
/// EF' = max(1.3, EF + (0.1 - (5 - q) * (0.08 + (5 - q) * 0.02)))
///
/// `due_at` is derived from `answered_at`, never from `now`. `now` only feeds
/// `updated_at`, which never moves backwards for a key.
pub fn calculate_next_review(
    prior: Option<&ReviewState>,
    key: &ReviewKey,
    quality: Quality,
    answered_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> ReviewState {
    let (mut repetition, mut interval, easiness) = match prior {
        Some(p) => (p.repetition, p.interval.max(DEFAULT_INTERVAL), p.easiness.max(MIN_EASINESS)),
        None => (0, DEFAULT_INTERVAL, DEFAULT_EASINESS),
    };

    if quality.is_pass() {
        interval = match repetition {
            0 => 1,
            1 => 6,
            _ => grow_interval(interval, easiness),
        };
        repetition = repetition.saturating_add(1);
    } else {
        repetition = 0;
        interval = 1;
    }

    let easiness = next_easiness(easiness, quality);

    let due_at = answered_at
        .checked_add_days(Days::new(u64::from(interval)))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);

    let updated_at = match prior {
        Some(p) if p.updated_at > now => p.updated_at,
        _ => now,
    };

    let (learner_id, question_id) = match prior {
        Some(p) => (p.learner_id.clone(), p.question_id.clone()),
        None => (key.learner_id.clone(), key.question_id.clone()),
    };

    ReviewState {
        learner_id,
        question_id,
        repetition,
        interval,
        easiness,
        due_at,
        updated_at,
        version: prior.map_or(0, |p| p.version),
    }
}

/// Rounds half away from zero (`f64::round`), so 7.5 becomes 8.
fn grow_interval(interval: u32, easiness: f64) -> u32 {
    let grown = (f64::from(interval) * easiness).round();
    // float-to-int casts saturate
    (grown as u32).max(1)
}

fn next_easiness(easiness: f64, quality: Quality) -> f64 {
    let q = f64::from(quality.value());
    let new_ef = easiness + (0.1 - (5.0 - q) * (0.08 + (5.0 - q) * 0.02));
    new_ef.max(MIN_EASINESS)
}

/// Intervals each quality 1..=5 would produce from `prior` if answered at
/// `at`, lowest quality first.
pub fn preview_intervals(prior: Option<&ReviewState>, key: &ReviewKey, at: DateTime<Utc>) -> [u32; 5] {
    Quality::ALL.map(|quality| calculate_next_review(prior, key, quality, at, at).interval)
}

/// Format an interval in days to a short human-readable string.
pub fn format_interval(days: u32) -> String {
    match days {
        0 => "now".to_string(),
        1..=6 => format!("{}d", days),
        7..=29 => format!("{}w", days / 7),
        30..=364 => format!("{}mo", days / 30),
        _ => format!("{}y", days / 365),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn key() -> ReviewKey {
        ReviewKey::new("learner-1", "question-1").unwrap()
    }

    fn q(v: i64) -> Quality {
        Quality::new(v).unwrap()
    }

    fn day0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 9, 30, 0).unwrap()
    }

    fn state(repetition: u32, interval: u32, easiness: f64) -> ReviewState {
        ReviewState {
            repetition,
            interval,
            easiness,
            ..ReviewState::seed(&key(), day0())
        }
    }

    #[test]
    fn failure_from_seed_matches_worked_example() {
        let next = calculate_next_review(None, &key(), q(1), day0(), day0());

        assert_eq!(next.repetition, 0);
        assert_eq!(next.interval, 1);
        assert!((next.easiness - 1.96).abs() < 1e-9, "easiness was {}", next.easiness);
        assert_eq!(next.due_at, day0() + Duration::days(1));
    }

    #[test]
    fn three_perfect_answers_climb_the_ladder() {
        let k = key();
        let first = calculate_next_review(None, &k, q(5), day0(), day0());
        let second = calculate_next_review(Some(&first), &k, q(5), day0(), day0());
        let third = calculate_next_review(Some(&second), &k, q(5), day0(), day0());

        assert_eq!((first.repetition, first.interval), (1, 1));
        assert_eq!((second.repetition, second.interval), (2, 6));
        assert_eq!(third.repetition, 3);
        assert_eq!(third.interval, (6.0 * second.easiness).round() as u32);
        assert_eq!(third.interval, 16);
        assert_eq!(third.due_at, day0() + Duration::days(16));
    }

    #[test]
    fn failure_resets_any_streak() {
        for quality in 1..=2 {
            let prior = state(7, 120, 2.9);
            let next = calculate_next_review(Some(&prior), &key(), q(quality), day0(), day0());
            assert_eq!(next.repetition, 0);
            assert_eq!(next.interval, 1);
        }
    }

    #[test]
    fn failure_still_moves_easiness() {
        let prior = state(4, 30, 2.5);
        let next = calculate_next_review(Some(&prior), &key(), q(2), day0(), day0());
        // 2.5 + (0.1 - 3 * (0.08 + 3 * 0.02)) = 2.18
        assert!((next.easiness - 2.18).abs() < 1e-9);
    }

    #[test]
    fn absent_prior_equals_explicit_seed() {
        let k = key();
        for quality in 1..=5 {
            let from_none = calculate_next_review(None, &k, q(quality), day0(), day0());
            let seed = ReviewState::seed(&k, day0());
            let from_seed = calculate_next_review(Some(&seed), &k, q(quality), day0(), day0());
            assert_eq!(from_none, from_seed);
        }
    }

    #[test]
    fn easiness_never_drops_below_floor() {
        let mut current = state(0, 1, MIN_EASINESS);
        for _ in 0..10 {
            current = calculate_next_review(Some(&current), &key(), q(1), day0(), day0());
            assert!(current.easiness >= MIN_EASINESS);
        }
        assert_eq!(current.easiness, MIN_EASINESS);
    }

    #[test]
    fn every_quality_keeps_interval_positive() {
        let priors = [
            state(0, 1, 2.5),
            state(1, 1, 1.3),
            state(2, 6, 1.3),
            state(9, 400, 3.1),
            // a record written by something else with a zero interval
            state(5, 0, 1.0),
        ];
        for prior in &priors {
            for quality in 1..=5 {
                let next = calculate_next_review(Some(prior), &key(), q(quality), day0(), day0());
                assert!(next.interval >= 1);
                assert!(next.easiness >= MIN_EASINESS);
            }
        }
    }

    #[test]
    fn half_interval_rounds_away_from_zero() {
        // 3 * 2.5 = 7.5
        let prior = state(2, 3, 2.5);
        let next = calculate_next_review(Some(&prior), &key(), q(5), day0(), day0());
        assert_eq!(next.interval, 8);
    }

    #[test]
    fn due_date_ignores_wall_clock() {
        let prior = state(2, 10, 2.5);
        let later = day0() + Duration::days(400);
        let a = calculate_next_review(Some(&prior), &key(), q(4), day0(), day0());
        let b = calculate_next_review(Some(&prior), &key(), q(4), day0(), later);

        assert_eq!(a.due_at, b.due_at);
        assert_eq!(a.due_at, day0() + Duration::days(25));
        // time of day is kept
        assert_eq!(a.due_at.time(), day0().time());
    }

    #[test]
    fn updated_at_never_moves_backwards() {
        let mut prior = state(1, 1, 2.5);
        prior.updated_at = day0() + Duration::hours(5);
        let next = calculate_next_review(Some(&prior), &key(), q(5), day0(), day0());
        assert_eq!(next.updated_at, prior.updated_at);
    }

    #[test]
    fn huge_intervals_saturate() {
        let prior = state(50, u32::MAX, 3.0);
        let next = calculate_next_review(Some(&prior), &key(), q(5), day0(), day0());
        assert_eq!(next.interval, u32::MAX);
        assert!(next.due_at > day0());
    }

    #[test]
    fn key_and_version_are_carried_forward() {
        let mut prior = state(2, 6, 2.5);
        prior.version = 7;
        let other = ReviewKey::new("someone-else", "other").unwrap();
        let next = calculate_next_review(Some(&prior), &other, q(4), day0(), day0());

        assert_eq!(next.key(), key());
        assert_eq!(next.version, 7);
    }

    #[test]
    fn preview_lists_one_interval_per_quality() {
        let prior = state(2, 10, 2.5);
        assert_eq!(preview_intervals(Some(&prior), &key(), day0()), [1, 1, 25, 25, 25]);
        assert_eq!(preview_intervals(None, &key(), day0()), [1, 1, 1, 1, 1]);
    }

    #[test]
    fn test_format_interval() {
        assert_eq!(format_interval(0), "now");
        assert_eq!(format_interval(1), "1d");
        assert_eq!(format_interval(6), "6d");
        assert_eq!(format_interval(14), "2w");
        assert_eq!(format_interval(90), "3mo");
        assert_eq!(format_interval(730), "2y");
    }
}
