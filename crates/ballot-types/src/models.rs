use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `created_by` value for polls authored without a signed-in user.
pub const ANONYMOUS_CREATOR: &str = "anonymous";

/// Minimum number of non-blank options a poll needs.
pub const MIN_OPTIONS: usize = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollOption {
    pub id: String,
    pub text: String,
    pub votes: u64,
}

/// A poll record as stored and as pushed to every viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poll {
    pub id: Uuid,
    pub question: String,
    pub options: Vec<PollOption>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    /// Older records were written without a voter set.
    #[serde(default)]
    pub voted_uids: BTreeSet<Uuid>,
}

impl Poll {
    pub fn total_votes(&self) -> u64 {
        self.options.iter().map(|o| o.votes).sum()
    }

    pub fn option(&self, option_id: &str) -> Option<&PollOption> {
        self.options.iter().find(|o| o.id == option_id)
    }

    pub fn has_voted(&self, user_id: Uuid) -> bool {
        self.voted_uids.contains(&user_id)
    }

    /// Display percentages, one per option in display order.
    pub fn percentages(&self) -> Vec<u32> {
        let total = self.total_votes();
        self.options
            .iter()
            .map(|o| percentage(o.votes, total))
            .collect()
    }

    /// Option with the most votes; ties go to the earliest in display order.
    /// `None` until someone has voted.
    pub fn leading_option(&self) -> Option<&PollOption> {
        if self.total_votes() == 0 {
            return None;
        }
        self.options
            .iter()
            .reduce(|best, o| if o.votes > best.votes { o } else { best })
    }

    pub fn summary(&self) -> PollSummary {
        PollSummary {
            poll_id: self.id,
            question: self.question.clone(),
            created_at: self.created_at,
            total_votes: self.total_votes(),
            leading: self.leading_option().cloned(),
        }
    }
}

/// One row of a creator's poll history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSummary {
    pub poll_id: Uuid,
    pub question: String,
    pub created_at: DateTime<Utc>,
    pub total_votes: u64,
    /// `None` shows as "No votes yet"
    pub leading: Option<PollOption>,
}

/// `round(votes / total * 100)`, half rounding up, 0 when nobody voted.
pub fn percentage(votes: u64, total: u64) -> u32 {
    if total == 0 {
        return 0;
    }
    ((votes * 200 + total) / (total * 2)) as u32
}

// -- Authoring --

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DraftError {
    #[error("question must not be blank")]
    BlankQuestion,

    #[error("a poll needs at least {MIN_OPTIONS} non-blank options, got {0}")]
    TooFewOptions(usize),
}

/// A validated poll draft: trimmed question and the trimmed non-blank
/// option labels in their original order. Ids and counters are assigned
/// when the record is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPoll {
    pub question: String,
    pub options: Vec<String>,
}

impl NewPoll {
    pub fn validate<S: AsRef<str>>(question: &str, options: &[S]) -> Result<Self, DraftError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(DraftError::BlankQuestion);
        }

        let options: Vec<String> = options
            .iter()
            .map(|o| o.as_ref().trim())
            .filter(|o| !o.is_empty())
            .map(str::to_string)
            .collect();

        if options.len() < MIN_OPTIONS {
            return Err(DraftError::TooFewOptions(options.len()));
        }

        Ok(Self {
            question: question.to_string(),
            options,
        })
    }
}

// -- Results --

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultRow {
    pub option_id: String,
    pub text: String,
    pub votes: u64,
    pub percent: u32,
    pub selected: bool,
}

/// What a viewer sees once percentages are shown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollResults {
    pub total_votes: u64,
    pub rows: Vec<ResultRow>,
}

impl PollResults {
    pub fn compute(poll: &Poll, selected: Option<&str>) -> Self {
        let total_votes = poll.total_votes();
        let rows = poll
            .options
            .iter()
            .map(|o| ResultRow {
                option_id: o.id.clone(),
                text: o.text.clone(),
                votes: o.votes,
                percent: percentage(o.votes, total_votes),
                selected: selected == Some(o.id.as_str()),
            })
            .collect();

        Self { total_votes, rows }
    }
}
