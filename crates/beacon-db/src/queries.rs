use std::collections::BTreeMap;

use anyhow::Result;
use chrono::Utc;
use rusqlite::Connection;
use uuid::Uuid;

use beacon_types::UserIdentity;

use crate::Database;
use crate::models::{UserRow, to_db_time};

impl Database {
    // -- Users --

    pub fn create_user(&self, id: &str, username: &str, password_hash: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password, created_at) VALUES (?1, ?2, ?3, ?4)",
                (id, username, password_hash, to_db_time(Utc::now())),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    pub fn set_staff(&self, user_id: Uuid, is_staff: bool) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE users SET is_staff = ?1 WHERE id = ?2",
                rusqlite::params![is_staff, user_id.to_string()],
            )?;
            Ok(())
        })
    }

    // -- Groups --

    pub fn create_group(&self, name: &str) -> Result<i64> {
        self.with_conn_mut(|conn| {
            conn.execute("INSERT INTO auth_groups (name) VALUES (?1)", [name])?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn add_user_to_group(&self, user_id: Uuid, group_id: i64) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO user_groups (user_id, group_id) VALUES (?1, ?2)",
                rusqlite::params![user_id.to_string(), group_id],
            )?;
            Ok(())
        })
    }

    pub fn set_user_attribute(&self, user_id: Uuid, key: &str, value: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO user_attributes (user_id, key, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT (user_id, key) DO UPDATE SET value = excluded.value",
                rusqlite::params![user_id.to_string(), key, value],
            )?;
            Ok(())
        })
    }

    /// Everything the audience filter needs to know about a user.
    pub fn load_identity(&self, user_id: Uuid) -> Result<Option<UserIdentity>> {
        self.with_conn(|conn| {
            let id = user_id.to_string();
            let Some(user) = query_user(conn, "id", &id)? else {
                return Ok(None);
            };

            let mut stmt =
                conn.prepare("SELECT group_id FROM user_groups WHERE user_id = ?1 ORDER BY group_id")?;
            let group_ids = stmt
                .query_map([&id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<i64>, _>>()?;

            let mut stmt = conn.prepare("SELECT key, value FROM user_attributes WHERE user_id = ?1")?;
            let attributes = stmt
                .query_map([&id], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<BTreeMap<String, String>, _>>()?;

            Ok(Some(UserIdentity {
                id: user_id,
                username: user.username,
                is_staff: user.is_staff,
                group_ids,
                attributes,
            }))
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!(
        "SELECT id, username, password, is_staff, created_at FROM users WHERE {} = ?1",
        column
    );
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                is_staff: row.get(3)?,
                created_at: row.get(4)?,
            })
        })
        .optional()?;

    Ok(row)
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
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
