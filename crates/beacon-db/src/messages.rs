use std::collections::HashMap;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use rusqlite::types::ToSql;
use tracing::info;
use uuid::Uuid;

use beacon_types::{CustomGroupRegistry, MessageError, PersistentMessage};

use crate::Database;
use crate::models::{MESSAGE_COLUMNS, MessageRow, to_db_time};
use crate::queries::OptionalExt;

/// Filters for the operator listing.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    /// Case-insensitive substring of the content.
    pub query: Option<String>,
    /// `Some(true)` keeps messages inside their display window at `now`,
    /// `Some(false)` keeps the rest.
    pub active: Option<bool>,
}

impl Database {
    /// Validate and insert a new message. On success `message` gains its id
    /// and timestamps.
    pub fn create_message(
        &self,
        message: &mut PersistentMessage,
        registry: &CustomGroupRegistry,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        validate(message, registry)?;

        let id = self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO persistent_messages (
                    content, mark_content_safe, level, target, target_custom_group,
                    display_from, display_until, is_dismissable, custom_tags, created_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
                rusqlite::params![
                    message.content,
                    message.mark_content_safe,
                    message.level.value(),
                    message.target.as_str(),
                    message.target_custom_group,
                    to_db_time(message.display_from),
                    message.display_until.map(to_db_time),
                    message.is_dismissable,
                    message.custom_tags,
                    to_db_time(now),
                ],
            )?;
            let id = conn.last_insert_rowid();
            replace_targets(conn, id, &message.target_users, &message.target_groups)?;
            Ok(id)
        })?;

        message.id = Some(id);
        message.created_at = Some(now);
        message.updated_at = Some(now);
        info!("Created persistent message {} ({})", id, message.target.as_str());
        Ok(id)
    }

    /// Validate and save every field of a stored message.
    /// Returns `false` when the message no longer exists.
    pub fn update_message(
        &self,
        message: &mut PersistentMessage,
        registry: &CustomGroupRegistry,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let id = message
            .id
            .ok_or_else(|| anyhow!("cannot update a message that was never saved"))?;
        validate(message, registry)?;

        let updated = self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE persistent_messages SET
                    content = ?1, mark_content_safe = ?2, level = ?3, target = ?4,
                    target_custom_group = ?5, display_from = ?6, display_until = ?7,
                    is_dismissable = ?8, custom_tags = ?9, updated_at = ?10
                 WHERE id = ?11",
                rusqlite::params![
                    message.content,
                    message.mark_content_safe,
                    message.level.value(),
                    message.target.as_str(),
                    message.target_custom_group,
                    to_db_time(message.display_from),
                    message.display_until.map(to_db_time),
                    message.is_dismissable,
                    message.custom_tags,
                    to_db_time(now),
                    id,
                ],
            )?;
            if changed == 0 {
                return Ok(false);
            }
            replace_targets(conn, id, &message.target_users, &message.target_groups)?;
            Ok(true)
        })?;

        if updated {
            message.updated_at = Some(now);
        }
        Ok(updated)
    }

    pub fn get_message(&self, id: i64) -> Result<Option<PersistentMessage>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM persistent_messages m WHERE m.id = ?1", MESSAGE_COLUMNS);
            let row = conn
                .query_row(&sql, [id], MessageRow::from_row)
                .optional()?;
            match row {
                Some(row) => {
                    let mut messages = vec![row.into_message()?];
                    attach_targets(conn, &mut messages)?;
                    Ok(messages.pop())
                }
                None => Ok(None),
            }
        })
    }

    /// Messages inside their display window, regardless of audience.
    pub fn active_messages(&self, now: DateTime<Utc>) -> Result<Vec<PersistentMessage>> {
        self.list_messages(
            &MessageFilter {
                query: None,
                active: Some(true),
            },
            now,
        )
    }

    /// Operator listing, newest first.
    pub fn list_messages(
        &self,
        filter: &MessageFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<PersistentMessage>> {
        let now = to_db_time(now);
        let pattern = filter.query.as_ref().map(|q| format!("%{}%", q.to_lowercase()));

        let mut clauses: Vec<&str> = Vec::new();
        let mut params: Vec<&dyn ToSql> = Vec::new();
        if let Some(active) = filter.active {
            params.push(&now);
            clauses.push(if active {
                "(m.display_from <= ?1 AND (m.display_until IS NULL OR m.display_until > ?1))"
            } else {
                "NOT (m.display_from <= ?1 AND (m.display_until IS NULL OR m.display_until > ?1))"
            });
        }
        if let Some(pattern) = pattern.as_ref() {
            params.push(pattern);
            clauses.push(if params.len() == 1 {
                "LOWER(m.content) LIKE ?1"
            } else {
                "LOWER(m.content) LIKE ?2"
            });
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT {} FROM persistent_messages m {} ORDER BY m.created_at DESC, m.id DESC",
            MESSAGE_COLUMNS, where_clause
        );

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params.as_slice(), MessageRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let mut messages = rows
                .into_iter()
                .map(MessageRow::into_message)
                .collect::<Result<Vec<_>>>()?;
            attach_targets(conn, &mut messages)?;
            Ok(messages)
        })
    }

    /// Close the display window at `now` and persist it.
    pub fn deactivate_message(
        &self,
        message: &mut PersistentMessage,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let id = message
            .id
            .ok_or_else(|| anyhow!("cannot deactivate a message that was never saved"))?;
        message.deactivate(now);
        self.set_display_until(id, message.display_until, now)?;
        message.updated_at = Some(now);
        Ok(())
    }

    /// Reopen the display window and persist it.
    pub fn reactivate_message(
        &self,
        message: &mut PersistentMessage,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let id = message
            .id
            .ok_or_else(|| anyhow!("cannot reactivate a message that was never saved"))?;
        message.reactivate();
        self.set_display_until(id, None, now)?;
        message.updated_at = Some(now);
        Ok(())
    }

    /// Bulk deactivate. Messages already closed keep their original
    /// `display_until`. Returns the number of rows changed.
    pub fn deactivate_messages(&self, ids: &[i64], now: DateTime<Utc>) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let now = to_db_time(now);
        let sql = format!(
            "UPDATE persistent_messages SET display_until = ?1, updated_at = ?1
             WHERE id IN ({}) AND (display_until IS NULL OR display_until > ?1)",
            placeholders(2, ids.len())
        );
        self.bulk_update(&sql, &now, ids)
    }

    /// Bulk reactivate: clears `display_until`. Returns the number of rows changed.
    pub fn reactivate_messages(&self, ids: &[i64], now: DateTime<Utc>) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let now = to_db_time(now);
        let sql = format!(
            "UPDATE persistent_messages SET display_until = NULL, updated_at = ?1
             WHERE id IN ({}) AND display_until IS NOT NULL",
            placeholders(2, ids.len())
        );
        self.bulk_update(&sql, &now, ids)
    }

    fn bulk_update(&self, sql: &str, now: &str, ids: &[i64]) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let mut params: Vec<&dyn ToSql> = vec![&now];
            params.extend(ids.iter().map(|id| id as &dyn ToSql));
            Ok(conn.execute(sql, params.as_slice())?)
        })
    }

    fn set_display_until(
        &self,
        id: i64,
        until: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE persistent_messages SET display_until = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![until.map(to_db_time), to_db_time(now), id],
            )?;
            if changed == 0 {
                return Err(anyhow!("persistent message {} not found", id));
            }
            Ok(())
        })
    }
}

fn validate(message: &PersistentMessage, registry: &CustomGroupRegistry) -> Result<()> {
    if message.content.trim().is_empty() {
        return Err(MessageError::EmptyContent.into());
    }
    registry.validate(&message.target_custom_group)?;
    Ok(())
}

/// `?start, ?start+1, ...` for `count` parameters.
pub(crate) fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

fn replace_targets(conn: &Connection, id: i64, users: &[Uuid], groups: &[i64]) -> Result<()> {
    conn.execute(
        "DELETE FROM persistent_message_target_users WHERE message_id = ?1",
        [id],
    )?;
    conn.execute(
        "DELETE FROM persistent_message_target_groups WHERE message_id = ?1",
        [id],
    )?;
    for user in users {
        let exists = conn
            .query_row("SELECT 1 FROM users WHERE id = ?1", [user.to_string()], |_| Ok(()))
            .optional()?;
        if exists.is_none() {
            return Err(MessageError::UnknownTargetUser(*user).into());
        }
        conn.execute(
            "INSERT OR IGNORE INTO persistent_message_target_users (message_id, user_id) VALUES (?1, ?2)",
            rusqlite::params![id, user.to_string()],
        )?;
    }
    for group in groups {
        let exists = conn
            .query_row("SELECT 1 FROM auth_groups WHERE id = ?1", [group], |_| Ok(()))
            .optional()?;
        if exists.is_none() {
            return Err(MessageError::UnknownTargetGroup(*group).into());
        }
        conn.execute(
            "INSERT OR IGNORE INTO persistent_message_target_groups (message_id, group_id) VALUES (?1, ?2)",
            rusqlite::params![id, group],
        )?;
    }
    Ok(())
}

/// Batch-load target users and groups for a set of messages.
pub(crate) fn attach_targets(conn: &Connection, messages: &mut [PersistentMessage]) -> Result<()> {
    let ids: Vec<i64> = messages.iter().filter_map(|m| m.id).collect();
    if ids.is_empty() {
        return Ok(());
    }
    let params: Vec<&dyn ToSql> = ids.iter().map(|id| id as &dyn ToSql).collect();

    let mut users: HashMap<i64, Vec<Uuid>> = HashMap::new();
    let sql = format!(
        "SELECT message_id, user_id FROM persistent_message_target_users
         WHERE message_id IN ({}) ORDER BY user_id",
        placeholders(1, ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params.as_slice(), |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    for (message_id, user_id) in rows {
        let user_id: Uuid = user_id
            .parse()
            .map_err(|e| anyhow!("corrupt target user '{}' on message {}: {}", user_id, message_id, e))?;
        users.entry(message_id).or_default().push(user_id);
    }

    let mut groups: HashMap<i64, Vec<i64>> = HashMap::new();
    let sql = format!(
        "SELECT message_id, group_id FROM persistent_message_target_groups
         WHERE message_id IN ({}) ORDER BY group_id",
        placeholders(1, ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params.as_slice(), |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    for (message_id, group_id) in rows {
        groups.entry(message_id).or_default().push(group_id);
    }

    for message in messages.iter_mut() {
        if let Some(id) = message.id {
            message.target_users = users.remove(&id).unwrap_or_default();
            message.target_groups = groups.remove(&id).unwrap_or_default();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use beacon_types::{Level, MessageError, Target};

    use super::*;
    use crate::test_support::{db, identity, saved, user};

    #[test]
    fn create_assigns_id_and_round_trips() {
        let db = db();
        let now = Utc::now();
        let alice = user(&db, "alice");
        let group = db.create_group("staff").unwrap();

        let mut pm = PersistentMessage::new("Scheduled maintenance");
        pm.level = Level::Warning;
        pm.target = Target::UsersOrGroups;
        pm.target_users = vec![identity(&alice).id];
        pm.target_groups = vec![group];
        pm.custom_tags = "banner".into();
        let id = db
            .create_message(&mut pm, &CustomGroupRegistry::new(), now)
            .unwrap();

        assert_eq!(pm.id, Some(id));
        let loaded = db.get_message(id).unwrap().unwrap();
        assert_eq!(loaded.content, "Scheduled maintenance");
        assert_eq!(loaded.level, Level::Warning);
        assert_eq!(loaded.target, Target::UsersOrGroups);
        assert_eq!(loaded.target_users, vec![identity(&alice).id]);
        assert_eq!(loaded.target_groups, vec![group]);
        assert_eq!(loaded.custom_tags, "banner");
        assert!(loaded.display_until.is_none());
        assert_eq!(
            loaded.extra_tags(),
            format!("persistent pm-{} dismissable unsafe banner", id)
        );
    }

    #[test]
    fn create_rejects_unregistered_custom_group() {
        let db = db();
        let mut pm = PersistentMessage::new("hello");
        pm.target = Target::UsersOrGroups;
        pm.target_custom_group = "vip".into();

        let err = db
            .create_message(&mut pm, &CustomGroupRegistry::new(), Utc::now())
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<MessageError>(),
            Some(&MessageError::UnknownCustomGroup("vip".into()))
        );
        assert!(pm.id.is_none());
        assert!(db.list_messages(&MessageFilter::default(), Utc::now()).unwrap().is_empty());
    }

    #[test]
    fn create_rejects_unknown_targets() {
        let db = db();
        let stranger = Uuid::new_v4();
        let mut pm = PersistentMessage::new("hello");
        pm.target = Target::UsersOrGroups;
        pm.target_users = vec![stranger];

        let err = db
            .create_message(&mut pm, &CustomGroupRegistry::new(), Utc::now())
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<MessageError>(),
            Some(&MessageError::UnknownTargetUser(stranger))
        );
        assert!(pm.id.is_none());
        assert!(db.list_messages(&MessageFilter::default(), Utc::now()).unwrap().is_empty());

        pm.target_users.clear();
        pm.target_groups = vec![77];
        let err = db
            .create_message(&mut pm, &CustomGroupRegistry::new(), Utc::now())
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<MessageError>(),
            Some(&MessageError::UnknownTargetGroup(77))
        );
        assert!(db.list_messages(&MessageFilter::default(), Utc::now()).unwrap().is_empty());
    }

    #[test]
    fn update_with_unknown_target_keeps_stored_row() {
        let db = db();
        let now = Utc::now();
        let mut pm = saved(&db, "original", Target::AllUsers, now);
        let id = pm.id.unwrap();

        pm.content = "changed".into();
        pm.target_groups = vec![404];
        let err = db
            .update_message(&mut pm, &CustomGroupRegistry::new(), now)
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<MessageError>(),
            Some(&MessageError::UnknownTargetGroup(404))
        );
        assert_eq!(db.get_message(id).unwrap().unwrap().content, "original");
    }

    #[test]
    fn create_rejects_empty_content() {
        let db = db();
        let mut pm = PersistentMessage::new("   ");
        let err = db
            .create_message(&mut pm, &CustomGroupRegistry::new(), Utc::now())
            .unwrap_err();
        assert_eq!(err.downcast_ref::<MessageError>(), Some(&MessageError::EmptyContent));
    }

    #[test]
    fn update_validates_and_replaces_targets() {
        let db = db();
        let now = Utc::now();
        let registry = CustomGroupRegistry::new().with("vip", |_: &beacon_types::Viewer| true);
        let alice = user(&db, "alice");
        let mut pm = saved(&db, "v1", Target::AllUsers, now);

        pm.content = "v2".into();
        pm.target = Target::UsersOrGroups;
        pm.target_users = vec![identity(&alice).id];
        pm.target_custom_group = "vip".into();
        assert!(db.update_message(&mut pm, &registry, now).unwrap());

        let loaded = db.get_message(pm.id.unwrap()).unwrap().unwrap();
        assert_eq!(loaded.content, "v2");
        assert_eq!(loaded.target_custom_group, "vip");
        assert_eq!(loaded.target_users, vec![identity(&alice).id]);

        pm.target_custom_group = "beta".into();
        assert!(db.update_message(&mut pm, &registry, now).is_err());
        let loaded = db.get_message(pm.id.unwrap()).unwrap().unwrap();
        assert_eq!(loaded.target_custom_group, "vip");
    }

    #[test]
    fn update_of_missing_message_reports_false() {
        let db = db();
        let mut pm = PersistentMessage::new("gone");
        pm.id = Some(404);
        assert!(!db
            .update_message(&mut pm, &CustomGroupRegistry::new(), Utc::now())
            .unwrap());
    }

    #[test]
    fn deactivate_and_reactivate_persist() {
        let db = db();
        let now = Utc::now();
        let mut pm = saved(&db, "hello", Target::AllUsers, now);
        assert_eq!(db.active_messages(now).unwrap().len(), 1);

        db.deactivate_message(&mut pm, now).unwrap();
        assert!(!pm.is_active_at(now));
        assert!(db.active_messages(now).unwrap().is_empty());
        let stored = db.get_message(pm.id.unwrap()).unwrap().unwrap();
        assert!(stored.display_until.is_some());

        let later = now + Duration::seconds(1);
        db.reactivate_message(&mut pm, later).unwrap();
        assert!(pm.is_active_at(later));
        let stored = db.get_message(pm.id.unwrap()).unwrap().unwrap();
        assert!(stored.display_until.is_none());
        assert_eq!(db.active_messages(later).unwrap().len(), 1);
    }

    #[test]
    fn future_messages_are_not_active() {
        let db = db();
        let now = Utc::now();
        let mut pm = PersistentMessage::new("soon");
        pm.display_from = now + Duration::hours(1);
        db.create_message(&mut pm, &CustomGroupRegistry::new(), now).unwrap();

        assert!(db.active_messages(now).unwrap().is_empty());
        assert_eq!(db.active_messages(now + Duration::hours(2)).unwrap().len(), 1);
    }

    #[test]
    fn bulk_activation() {
        let db = db();
        let now = Utc::now();
        let a = saved(&db, "a", Target::AllUsers, now).id.unwrap();
        let b = saved(&db, "b", Target::AllUsers, now).id.unwrap();

        assert_eq!(db.deactivate_messages(&[a, b, 999], now).unwrap(), 2);
        assert_eq!(db.deactivate_messages(&[a], now).unwrap(), 0);
        assert!(db.active_messages(now).unwrap().is_empty());

        assert_eq!(db.reactivate_messages(&[b], now).unwrap(), 1);
        let active = db.active_messages(now).unwrap();
        assert_eq!(active.iter().map(|m| m.id.unwrap()).collect::<Vec<_>>(), vec![b]);
        assert_eq!(db.reactivate_messages(&[], now).unwrap(), 0);
    }

    #[test]
    fn list_filters_by_text_and_state() {
        let db = db();
        let now = Utc::now();
        saved(&db, "Disk space low", Target::AllUsers, now);
        let mut old = saved(&db, "Old DISK notice", Target::AllUsers, now);
        saved(&db, "Welcome", Target::AllUsers, now);
        db.deactivate_message(&mut old, now).unwrap();

        let disk = MessageFilter {
            query: Some("disk".into()),
            active: None,
        };
        assert_eq!(db.list_messages(&disk, now).unwrap().len(), 2);

        let active_disk = MessageFilter {
            active: Some(true),
            ..disk.clone()
        };
        let found = db.list_messages(&active_disk, now).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].content, "Disk space low");

        let inactive = MessageFilter {
            query: None,
            active: Some(false),
        };
        let found = db.list_messages(&inactive, now).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].content, "Old DISK notice");
    }
}
