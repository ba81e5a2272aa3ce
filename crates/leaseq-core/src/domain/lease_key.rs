//! LeaseKey - lease store のキー
//!
//! `<deadline>:<content digest>` 形式。deadline は UTC の `YYYYMMDDHHMMSS`（固定 14 桁）。
//! 固定幅なので文字列の辞書順 = deadline の時刻順になり、
//! `key < expiry_bound(now)` の範囲スキャンがそのまま「期限切れ lease の一覧」になる。

use std::fmt;

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use sha2::{Digest, Sha256};

use crate::error::{QueueError, Result};

const DEADLINE_FORMAT: &str = "%Y%m%d%H%M%S";
const DEADLINE_WIDTH: usize = 14;
const SEPARATOR: char = ':';

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LeaseKey(String);

impl LeaseKey {
    /// Build the key for a lease expiring at `deadline` over the raw (pre-mutation) record bytes.
    pub fn new(deadline: DateTime<Utc>, raw_record: &[u8]) -> Self {
        Self(format!(
            "{}{SEPARATOR}{}",
            render_deadline(deadline),
            content_digest(raw_record)
        ))
    }

    /// Upper bound (exclusive) of the expired range at `now`.
    ///
    /// A lease whose deadline second equals `now` is not yet expired: its key
    /// shares the 14-digit prefix and is therefore longer, hence greater.
    pub fn expiry_bound(now: DateTime<Utc>) -> String {
        render_deadline(now)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = || QueueError::InvalidLeaseKey(raw.to_string());
        let (deadline, digest) = raw.split_once(SEPARATOR).ok_or_else(invalid)?;
        if deadline.len() != DEADLINE_WIDTH || !deadline.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        if digest.is_empty() || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        Ok(Self(raw.to_string()))
    }

    /// Deadline encoded in the key prefix.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        let digits = self.0.get(..DEADLINE_WIDTH)?;
        let field = |range: std::ops::Range<usize>| digits.get(range)?.parse::<u32>().ok();
        let year = digits.get(0..4)?.parse::<i32>().ok()?;
        NaiveDate::from_ymd_opt(year, field(4..6)?, field(6..8)?)?
            .and_hms_opt(field(8..10)?, field(10..12)?, field(12..14)?)
            .map(|naive| naive.and_utc())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for LeaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl AsRef<str> for LeaseKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// `now + timeout_secs`, clamped so the rendered deadline keeps its 14-digit width.
pub fn deadline_after(now: DateTime<Utc>, timeout_secs: i64) -> DateTime<Utc> {
    let latest = latest_deadline();
    TimeDelta::try_seconds(timeout_secs)
        .and_then(|delta| now.checked_add_signed(delta))
        .map_or(latest, |deadline| deadline.min(latest))
}

fn latest_deadline() -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(9999, 12, 31)
        .and_then(|d| d.and_hms_opt(23, 59, 59))
        .map(|naive| naive.and_utc())
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn render_deadline(at: DateTime<Utc>) -> String {
    at.format(DEADLINE_FORMAT).to_string()
}

fn content_digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
