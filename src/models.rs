use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ScheduleError;

pub const DEFAULT_EASINESS: f64 = 2.5;
pub const MIN_EASINESS: f64 = 1.3;
pub const DEFAULT_INTERVAL: u32 = 1;

/// Identifies one review record: a learner paired with a question.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReviewKey {
    pub learner_id: String,
    pub question_id: String,
}

impl ReviewKey {
    pub fn new(learner_id: impl Into<String>, question_id: impl Into<String>) -> Result<Self, ScheduleError> {
        let learner_id = learner_id.into();
        let question_id = question_id.into();

        if learner_id.trim().is_empty() {
            return Err(ScheduleError::validation("learner_id", "must not be empty"));
        }
        if question_id.trim().is_empty() {
            return Err(ScheduleError::validation("question_id", "must not be empty"));
        }

        Ok(Self { learner_id, question_id })
    }
}

impl fmt::Display for ReviewKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.learner_id, self.question_id)
    }
}

/// SM-2 response quality.
///
/// 5 - Perfect response
/// 4 - Correct response after a hesitation
/// 3 - Correct response recalled with serious difficulty
/// 2 - Incorrect response; where the correct one seemed easy to recall
/// 1 - Incorrect response; the correct one remembered
///
/// Anything below 3 counts as a failed recall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct Quality(u8);

impl Quality {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;
    pub const ALL: [Quality; 5] = [Quality(1), Quality(2), Quality(3), Quality(4), Quality(5)];

    pub fn new(value: i64) -> Result<Self, ScheduleError> {
        if !(i64::from(Self::MIN)..=i64::from(Self::MAX)).contains(&value) {
            return Err(ScheduleError::validation(
                "quality",
                format!("must be between {} and {}, got {}", Self::MIN, Self::MAX, value),
            ));
        }
        Ok(Self(value as u8))
    }

    /// "knew it" maps to 5, "guessed" maps to 1.
    pub fn from_correct(correct: bool) -> Self {
        if correct {
            Self(Self::MAX)
        } else {
            Self(Self::MIN)
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn is_pass(self) -> bool {
        self.0 >= 3
    }
}

impl TryFrom<i64> for Quality {
    type Error = ScheduleError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Quality> for u8 {
    fn from(q: Quality) -> Self {
        q.0
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewState {
    pub learner_id: String,
    pub question_id: String,
    pub repetition: u32,
    pub interval: u32, // days
    pub easiness: f64,
    pub due_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    // Assigned by the store; 0 until the first write.
    #[serde(default)]
    pub version: i64,
}

impl ReviewState {
    /// Seed values used when a key has never been answered.
    pub fn seed(key: &ReviewKey, now: DateTime<Utc>) -> Self {
        Self {
            learner_id: key.learner_id.clone(),
            question_id: key.question_id.clone(),
            repetition: 0,
            interval: DEFAULT_INTERVAL,
            easiness: DEFAULT_EASINESS,
            due_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn key(&self) -> ReviewKey {
        ReviewKey {
            learner_id: self.learner_id.clone(),
            question_id: self.question_id.clone(),
        }
    }

    pub fn is_due(&self, at: DateTime<Utc>) -> bool {
        self.due_at <= at
    }
}

/// Incoming "submit response" event as it arrives from the answer collaborator.
///
/// Every field is optional on the wire so that a missing one surfaces as a
/// validation error naming the field instead of an opaque decode failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitResponse {
    #[serde(alias = "user_id")]
    pub learner_id: Option<String>,
    pub question_id: Option<String>,
    pub quality: Option<i64>,
    pub answered_at: Option<DateTime<Utc>>,
}

impl SubmitResponse {
    pub fn validate(self) -> Result<(ReviewKey, Quality, DateTime<Utc>), ScheduleError> {
        let learner_id = self
            .learner_id
            .ok_or_else(|| ScheduleError::validation("learner_id", "missing"))?;
        let question_id = self
            .question_id
            .ok_or_else(|| ScheduleError::validation("question_id", "missing"))?;
        let quality = self
            .quality
            .ok_or_else(|| ScheduleError::validation("quality", "missing"))?;
        let answered_at = self
            .answered_at
            .ok_or_else(|| ScheduleError::validation("answered_at", "missing"))?;

        let key = ReviewKey::new(learner_id, question_id)?;
        let quality = Quality::new(quality)?;
        Ok((key, quality, answered_at))
    }
}
