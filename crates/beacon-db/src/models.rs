// Database row types. These map directly to SQLite rows and are converted
// into beacon-types models at the edge of the crate.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, NaiveDateTime, Utc};
use uuid::Uuid;

use beacon_types::{Level, PersistentMessage, Target};

/// Fixed-width UTC format so that text comparison in SQL orders correctly.
const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

pub fn to_db_time(at: DateTime<Utc>) -> String {
    at.format(TIME_FORMAT).to_string()
}

pub fn parse_db_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // SQLite's datetime('now') has no timezone; treat it as UTC.
            NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .with_context(|| format!("invalid timestamp '{}'", value))
}

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub is_staff: bool,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: i64,
    pub content: String,
    pub mark_content_safe: bool,
    pub level: i64,
    pub target: String,
    pub target_custom_group: String,
    pub display_from: String,
    pub display_until: Option<String>,
    pub is_dismissable: bool,
    pub custom_tags: String,
    pub created_at: String,
    pub updated_at: String,
}

pub(crate) const MESSAGE_COLUMNS: &str = "m.id, m.content, m.mark_content_safe, m.level, m.target, \
     m.target_custom_group, m.display_from, m.display_until, m.is_dismissable, m.custom_tags, \
     m.created_at, m.updated_at";

impl MessageRow {
    /// Reads the leading `MESSAGE_COLUMNS` of a row.
    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            content: row.get(1)?,
            mark_content_safe: row.get(2)?,
            level: row.get(3)?,
            target: row.get(4)?,
            target_custom_group: row.get(5)?,
            display_from: row.get(6)?,
            display_until: row.get(7)?,
            is_dismissable: row.get(8)?,
            custom_tags: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    pub fn into_message(self) -> Result<PersistentMessage> {
        let level = u16::try_from(self.level)
            .ok()
            .and_then(Level::from_value)
            .ok_or_else(|| anyhow!("message {}: unknown level {}", self.id, self.level))?;
        let target = Target::parse(&self.target)
            .ok_or_else(|| anyhow!("message {}: unknown target '{}'", self.id, self.target))?;

        Ok(PersistentMessage {
            id: Some(self.id),
            content: self.content,
            mark_content_safe: self.mark_content_safe,
            level,
            target,
            target_users: Vec::new(),
            target_groups: Vec::new(),
            target_custom_group: self.target_custom_group,
            display_from: parse_db_time(&self.display_from)?,
            display_until: self.display_until.as_deref().map(parse_db_time).transpose()?,
            is_dismissable: self.is_dismissable,
            custom_tags: self.custom_tags,
            created_at: Some(parse_db_time(&self.created_at)?),
            updated_at: Some(parse_db_time(&self.updated_at)?),
        })
    }
}

pub struct DismissalRow {
    pub user_id: Uuid,
    pub message_id: i64,
    pub dismissed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn db_time_sorts_lexically() {
        let early = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let late = early + chrono::Duration::milliseconds(1500);
        assert!(to_db_time(early) < to_db_time(late));
        assert_eq!(to_db_time(early), "2024-01-02T03:04:05.000000Z");
        assert_eq!(parse_db_time(&to_db_time(late)).unwrap(), late);
    }

    #[test]
    fn parses_sqlite_default_timestamps() {
        let parsed = parse_db_time("2024-05-21 16:07:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 5, 21, 16, 7, 0).unwrap());
        assert!(parse_db_time("yesterday").is_err());
    }
}
