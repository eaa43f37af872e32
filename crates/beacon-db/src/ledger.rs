use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use beacon_types::{MessageError, PersistentMessage, Viewer};

use crate::Database;
use crate::models::{DismissalRow, parse_db_time, to_db_time};
use crate::queries::OptionalExt;

impl Database {
    /// Record that `viewer` dismissed `message`.
    ///
    /// Undismissable messages fail before anything is written. Anonymous
    /// viewers are a no-op, as is dismissing the same message twice: the
    /// original `dismissed_at` is kept.
    pub fn dismiss(
        &self,
        message: &PersistentMessage,
        viewer: &Viewer,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let id = message
            .id
            .ok_or_else(|| anyhow!("cannot dismiss a message that was never saved"))?;
        if !message.is_dismissable {
            return Err(MessageError::Undismissable(id).into());
        }
        let Some(user) = viewer.user() else {
            return Ok(());
        };

        let inserted = self.with_conn_mut(|conn| {
            Ok(conn.execute(
                "INSERT OR IGNORE INTO persistent_message_dismissals (user_id, message_id, dismissed_at)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![user.id.to_string(), id, to_db_time(now)],
            )?)
        })?;
        if inserted == 0 {
            debug!("Message {} already dismissed by {}", id, user.id);
        } else {
            debug!("Message {} dismissed by {}", id, user.id);
        }
        Ok(())
    }

    pub fn get_dismissal(&self, user_id: Uuid, message_id: i64) -> Result<Option<DismissalRow>> {
        self.with_conn(|conn| {
            let dismissed_at: Option<String> = conn
                .query_row(
                    "SELECT dismissed_at FROM persistent_message_dismissals
                     WHERE user_id = ?1 AND message_id = ?2",
                    rusqlite::params![user_id.to_string(), message_id],
                    |row| row.get(0),
                )
                .optional()?;
            dismissed_at
                .map(|at| {
                    Ok(DismissalRow {
                        user_id,
                        message_id,
                        dismissed_at: parse_db_time(&at)?,
                    })
                })
                .transpose()
        })
    }

    /// Users who dismissed the message, oldest dismissal first.
    pub fn dismissed_by(&self, message_id: i64) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id FROM persistent_message_dismissals
                 WHERE message_id = ?1 ORDER BY dismissed_at, id",
            )?;
            let ids = stmt
                .query_map([message_id], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            ids.into_iter()
                .map(|id| id.parse().map_err(|e| anyhow!("corrupt user id '{}': {}", id, e)))
                .collect()
        })
    }

    /// Ids of the messages a user has dismissed.
    pub fn dismissed_messages(&self, user_id: Uuid) -> Result<Vec<i64>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT message_id FROM persistent_message_dismissals
                 WHERE user_id = ?1 ORDER BY message_id",
            )?;
            let ids = stmt
                .query_map([user_id.to_string()], |row| row.get(0))?
                .collect::<std::result::Result<Vec<i64>, _>>()?;
            Ok(ids)
        })
    }

    pub fn dismissal_count(&self, message_id: i64) -> Result<u64> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM persistent_message_dismissals WHERE message_id = ?1",
                [message_id],
                |row| row.get(0),
            )?)
        })
    }
}
