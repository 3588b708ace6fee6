use crate::models::{OptionRow, PollRow, UserRow};
use crate::Database;
use anyhow::{Result, anyhow};
use ballot_types::models::{Poll, PollOption};
use rusqlite::{Connection, ErrorCode};
use std::collections::BTreeSet;
use tracing::debug;
use uuid::Uuid;

/// Result of a vote attempt against the stored record.
#[derive(Debug)]
pub enum VoteOutcome {
    /// Counter bumped and voter recorded; carries the poll as committed.
    Recorded(Poll),
    PollNotFound,
    UnknownOption,
    AlreadyVoted,
}

impl Database {
    // -- Users --

    /// Returns false when the username is already taken.
    pub fn create_user(&self, id: &str, username: &str, password_hash: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            match conn.execute(
                "INSERT INTO users (id, username, password) VALUES (?1, ?2, ?3)",
                (id, username, password_hash),
            ) {
                Ok(_) => Ok(true),
                Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                    debug!("Username {} already taken", username);
                    Ok(false)
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    // -- Polls --

    /// Insert a poll and its options in one transaction and return the
    /// stored record. `options` is `(option_id, text)` in display order.
    pub fn insert_poll(
        &self,
        id: &str,
        question: &str,
        created_by: &str,
        options: &[(String, String)],
    ) -> Result<Poll> {
        self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;

            tx.execute(
                "INSERT INTO polls (id, question, created_by) VALUES (?1, ?2, ?3)",
                (id, question, created_by),
            )?;

            {
                let mut stmt = tx.prepare(
                    "INSERT INTO poll_options (poll_id, id, position, text) VALUES (?1, ?2, ?3, ?4)",
                )?;
                for (position, (option_id, text)) in options.iter().enumerate() {
                    stmt.execute(rusqlite::params![id, option_id, position as i64, text])?;
                }
            }

            tx.commit()?;

            query_poll(conn, id)?.ok_or_else(|| anyhow!("Poll vanished after insert: {}", id))
        })
    }

    pub fn get_poll(&self, id: &str) -> Result<Option<Poll>> {
        self.with_conn(|conn| query_poll(conn, id))
    }

    /// Polls authored by `created_by`, newest first.
    pub fn list_polls_by_creator(&self, created_by: &str) -> Result<Vec<Poll>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, question, created_by, created_at
                 FROM polls
                 WHERE created_by = ?1
                 ORDER BY created_at DESC, rowid DESC",
            )?;

            let rows = stmt
                .query_map([created_by], map_poll_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|row| {
                    let options = query_options(conn, &row.id)?;
                    let voters = query_voters(conn, &row.id)?;
                    assemble_poll(row, options, voters)
                })
                .collect()
        })
    }

    // -- Votes --

    /// Record one vote: adds the voter to the poll's voter set and bumps the
    /// chosen counter in place, both in one transaction. A voter already in
    /// the set leaves the record untouched.
    pub fn record_vote(&self, poll_id: &str, option_id: &str, user_id: &str) -> Result<VoteOutcome> {
        self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;

            let poll_exists: Option<i64> = tx
                .query_row("SELECT 1 FROM polls WHERE id = ?1", [poll_id], |row| row.get(0))
                .optional()?;
            if poll_exists.is_none() {
                return Ok(VoteOutcome::PollNotFound);
            }

            let option_exists: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM poll_options WHERE poll_id = ?1 AND id = ?2",
                    (poll_id, option_id),
                    |row| row.get(0),
                )
                .optional()?;
            if option_exists.is_none() {
                return Ok(VoteOutcome::UnknownOption);
            }

            let inserted = tx.execute(
                "INSERT OR IGNORE INTO poll_voters (poll_id, user_id) VALUES (?1, ?2)",
                (poll_id, user_id),
            )?;
            if inserted == 0 {
                debug!("Duplicate vote by {} on poll {}", user_id, poll_id);
                return Ok(VoteOutcome::AlreadyVoted);
            }

            tx.execute(
                "UPDATE poll_options SET votes = votes + 1 WHERE poll_id = ?1 AND id = ?2",
                (poll_id, option_id),
            )?;

            tx.commit()?;

            let poll = query_poll(conn, poll_id)?
                .ok_or_else(|| anyhow!("Poll vanished after vote: {}", poll_id))?;
            Ok(VoteOutcome::Recorded(poll))
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!(
        "SELECT id, username, password, created_at FROM users WHERE {} = ?1",
        column
    );
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                created_at: row.get(3)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn map_poll_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PollRow> {
    Ok(PollRow {
        id: row.get(0)?,
        question: row.get(1)?,
        created_by: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn query_poll(conn: &Connection, id: &str) -> Result<Option<Poll>> {
    let row = conn
        .query_row(
            "SELECT id, question, created_by, created_at FROM polls WHERE id = ?1",
            [id],
            map_poll_row,
        )
        .optional()?;

    let Some(row) = row else {
        return Ok(None);
    };

    let options = query_options(conn, id)?;
    let voters = query_voters(conn, id)?;
    assemble_poll(row, options, voters).map(Some)
}

fn query_options(conn: &Connection, poll_id: &str) -> Result<Vec<OptionRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, text, votes FROM poll_options WHERE poll_id = ?1 ORDER BY position",
    )?;

    let rows = stmt
        .query_map([poll_id], |row| {
            Ok(OptionRow {
                id: row.get(0)?,
                text: row.get(1)?,
                votes: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn query_voters(conn: &Connection, poll_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT user_id FROM poll_voters WHERE poll_id = ?1")?;
    let rows = stmt
        .query_map([poll_id], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn assemble_poll(row: PollRow, options: Vec<OptionRow>, voters: Vec<String>) -> Result<Poll> {
    let id: Uuid = row
        .id
        .parse()
        .map_err(|e| anyhow!("Corrupt poll id '{}': {}", row.id, e))?;

    let voted_uids: BTreeSet<Uuid> = voters
        .iter()
        .map(|v| {
            v.parse::<Uuid>()
                .map_err(|e| anyhow!("Corrupt voter id '{}' on poll '{}': {}", v, row.id, e))
        })
        .collect::<Result<_>>()?;

    Ok(Poll {
        id,
        question: row.question,
        options: options
            .into_iter()
            .map(|o| PollOption {
                id: o.id,
                text: o.text,
                votes: o.votes.max(0) as u64,
            })
            .collect(),
        created_by: row.created_by,
        created_at: parse_timestamp(&row.created_at)?,
        voted_uids,
    })
}

fn parse_timestamp(raw: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    raw.parse::<chrono::DateTime<chrono::Utc>>()
        .or_else(|_| {
            // Rows written with datetime('now') have no zone suffix.
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .map_err(|e| anyhow!("Corrupt timestamp '{}': {}", raw, e))
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
