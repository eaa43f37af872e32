//! Which persistent messages apply to a viewer.
//!
//! Rule-based targeting (target rule, target users, target groups, the
//! dismissal ledger and the display window) is a single SQL query. Custom
//! groups are arbitrary host predicates, so rows that can only match through
//! one are pulled back and checked here.

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::warn;

use beacon_types::{CustomGroupRegistry, PersistentMessage, Target, Viewer};

use crate::Database;
use crate::messages::attach_targets;
use crate::models::{MESSAGE_COLUMNS, MessageRow, to_db_time};

const ACTIVE_WINDOW: &str =
    "m.display_from <= ?1 AND (m.display_until IS NULL OR m.display_until > ?1)";

const ORDERING: &str = "ORDER BY m.level DESC, m.created_at DESC, m.id DESC";

/// `?2` is the user id.
const DIRECT_MATCH: &str = "(
    EXISTS (SELECT 1 FROM persistent_message_target_users tu
            WHERE tu.message_id = m.id AND tu.user_id = ?2)
    OR EXISTS (SELECT 1 FROM persistent_message_target_groups tg
               JOIN user_groups ug ON ug.group_id = tg.group_id
               WHERE tg.message_id = m.id AND ug.user_id = ?2)
)";

impl Database {
    /// Active messages for `viewer`, most severe and most recent first.
    pub fn messages_for(
        &self,
        viewer: &Viewer,
        registry: &CustomGroupRegistry,
        now: DateTime<Utc>,
    ) -> Result<Vec<PersistentMessage>> {
        let now = to_db_time(now);

        let candidates: Vec<(MessageRow, bool)> = self.with_conn(|conn| {
            let rows = match viewer.user() {
                None => {
                    let sql = format!(
                        "SELECT {cols}, 0 FROM persistent_messages m
                         WHERE {active}
                           AND (m.target IN ('ALL_USERS', 'ANONYMOUS_USERS')
                                OR (m.target = 'USERS_OR_GROUPS' AND m.target_custom_group != ''))
                         {order}",
                        cols = MESSAGE_COLUMNS,
                        active = ACTIVE_WINDOW,
                        order = ORDERING,
                    );
                    let mut stmt = conn.prepare(&sql)?;
                    let rows = stmt
                        .query_map([&now], |row| {
                            Ok((MessageRow::from_row(row)?, row.get::<_, bool>(12)?))
                        })?
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    rows
                }
                Some(user) => {
                    let sql = format!(
                        "SELECT {cols}, {direct} FROM persistent_messages m
                         WHERE {active}
                           AND NOT EXISTS (SELECT 1 FROM persistent_message_dismissals d
                                           WHERE d.message_id = m.id AND d.user_id = ?2)
                           AND (m.target IN ('ALL_USERS', 'AUTHENTICATED_USERS')
                                OR (m.target = 'USERS_OR_GROUPS'
                                    AND ({direct} OR m.target_custom_group != '')))
                         {order}",
                        cols = MESSAGE_COLUMNS,
                        direct = DIRECT_MATCH,
                        active = ACTIVE_WINDOW,
                        order = ORDERING,
                    );
                    let mut stmt = conn.prepare(&sql)?;
                    let rows = stmt
                        .query_map(rusqlite::params![now, user.id.to_string()], |row| {
                            Ok((MessageRow::from_row(row)?, row.get::<_, bool>(12)?))
                        })?
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    rows
                }
            };
            Ok(rows)
        })?;

        let mut messages = Vec::with_capacity(candidates.len());
        for (row, direct_match) in candidates {
            let message = row.into_message()?;
            if message.target != Target::UsersOrGroups
                || direct_match
                || custom_group_contains(registry, &message, viewer)
            {
                messages.push(message);
            }
        }

        self.with_conn(|conn| attach_targets(conn, &mut messages))?;
        Ok(messages)
    }
}

fn custom_group_contains(
    registry: &CustomGroupRegistry,
    message: &PersistentMessage,
    viewer: &Viewer,
) -> bool {
    if !message.has_custom_group() {
        return false;
    }
    match registry.matches(&message.target_custom_group, viewer) {
        Some(contains) => contains,
        None => {
            warn!(
                "Message {:?} targets unregistered custom group '{}'",
                message.id, message.target_custom_group
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use uuid::Uuid;

    use beacon_types::Level;

    use super::*;
    use crate::test_support::{db, identity, saved, user};

    fn contents(messages: &[PersistentMessage]) -> Vec<&str> {
        messages.iter().map(|m| m.content.as_str()).collect()
    }

    fn none() -> CustomGroupRegistry {
        CustomGroupRegistry::new()
    }

    #[test]
    fn all_users_message_reaches_everyone() {
        let db = db();
        let now = Utc::now();
        saved(&db, "hello", Target::AllUsers, now);
        let alice = user(&db, "alice");

        assert_eq!(contents(&db.messages_for(&Viewer::Anonymous, &none(), now).unwrap()), vec!["hello"]);
        assert_eq!(contents(&db.messages_for(&alice, &none(), now).unwrap()), vec!["hello"]);
    }

    #[test]
    fn authenticated_and_anonymous_rules_split_the_audience() {
        let db = db();
        let now = Utc::now();
        saved(&db, "members", Target::AuthenticatedUsers, now);
        saved(&db, "visitors", Target::AnonymousUsers, now);
        let alice = user(&db, "alice");

        assert_eq!(
            contents(&db.messages_for(&Viewer::Anonymous, &none(), now).unwrap()),
            vec!["visitors"]
        );
        assert_eq!(contents(&db.messages_for(&alice, &none(), now).unwrap()), vec!["members"]);
    }

    #[test]
    fn targeted_user_only() {
        let db = db();
        let now = Utc::now();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");

        let mut pm = PersistentMessage::new("for alice");
        pm.target = Target::UsersOrGroups;
        pm.target_users = vec![identity(&alice).id];
        pm.display_from = now - Duration::minutes(1);
        db.create_message(&mut pm, &none(), now).unwrap();

        let found = db.messages_for(&alice, &none(), now).unwrap();
        assert_eq!(contents(&found), vec!["for alice"]);
        assert_eq!(found[0].target_users, vec![identity(&alice).id]);
        assert!(db.messages_for(&bob, &none(), now).unwrap().is_empty());
        assert!(db.messages_for(&Viewer::Anonymous, &none(), now).unwrap().is_empty());
    }

    #[test]
    fn targeted_group_members() {
        let db = db();
        let now = Utc::now();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let ops = db.create_group("ops").unwrap();
        db.add_user_to_group(identity(&bob).id, ops).unwrap();

        let mut pm = PersistentMessage::new("for ops");
        pm.target = Target::UsersOrGroups;
        pm.target_groups = vec![ops];
        pm.display_from = now - Duration::minutes(1);
        db.create_message(&mut pm, &none(), now).unwrap();

        assert_eq!(contents(&db.messages_for(&bob, &none(), now).unwrap()), vec!["for ops"]);
        assert!(db.messages_for(&alice, &none(), now).unwrap().is_empty());
    }

    #[test]
    fn custom_group_predicate() {
        let db = db();
        let now = Utc::now();
        let registry = CustomGroupRegistry::new()
            .with("vip", |v: &Viewer| v.attribute("tier") == Some("gold"));
        let gold = user(&db, "gold");
        let silver = user(&db, "silver");
        db.set_user_attribute(identity(&gold).id, "tier", "gold").unwrap();
        db.set_user_attribute(identity(&silver).id, "tier", "silver").unwrap();
        let gold = Viewer::User(db.load_identity(identity(&gold).id).unwrap().unwrap());
        let silver = Viewer::User(db.load_identity(identity(&silver).id).unwrap().unwrap());

        let mut pm = PersistentMessage::new("vip lounge");
        pm.target = Target::UsersOrGroups;
        pm.target_custom_group = "vip".into();
        pm.display_from = now - Duration::minutes(1);
        db.create_message(&mut pm, &registry, now).unwrap();

        assert_eq!(contents(&db.messages_for(&gold, &registry, now).unwrap()), vec!["vip lounge"]);
        assert!(db.messages_for(&silver, &registry, now).unwrap().is_empty());
        assert!(db.messages_for(&Viewer::Anonymous, &registry, now).unwrap().is_empty());
    }

    #[test]
    fn custom_group_can_admit_anonymous_viewers() {
        let db = db();
        let now = Utc::now();
        let registry = CustomGroupRegistry::new().with("guests", |v: &Viewer| v.is_anonymous());

        let mut pm = PersistentMessage::new("sign up!");
        pm.target = Target::UsersOrGroups;
        pm.target_custom_group = "guests".into();
        pm.display_from = now - Duration::minutes(1);
        db.create_message(&mut pm, &registry, now).unwrap();
        let alice = user(&db, "alice");

        assert_eq!(
            contents(&db.messages_for(&Viewer::Anonymous, &registry, now).unwrap()),
            vec!["sign up!"]
        );
        assert!(db.messages_for(&alice, &registry, now).unwrap().is_empty());
    }

    #[test]
    fn unregistered_custom_group_matches_nobody() {
        let db = db();
        let now = Utc::now();
        let registry = CustomGroupRegistry::new().with("vip", |_: &Viewer| true);
        let mut pm = PersistentMessage::new("stale");
        pm.target = Target::UsersOrGroups;
        pm.target_custom_group = "vip".into();
        pm.display_from = now - Duration::minutes(1);
        db.create_message(&mut pm, &registry, now).unwrap();
        let alice = user(&db, "alice");

        // registry reconfigured without "vip"
        assert!(db.messages_for(&alice, &none(), now).unwrap().is_empty());
    }

    #[test]
    fn dismissed_messages_are_excluded() {
        let db = db();
        let now = Utc::now();
        let pm = saved(&db, "hello", Target::AllUsers, now);
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");

        db.dismiss(&pm, &alice, now).unwrap();

        assert!(db.messages_for(&alice, &none(), now).unwrap().is_empty());
        assert_eq!(contents(&db.messages_for(&bob, &none(), now).unwrap()), vec!["hello"]);
        assert_eq!(
            contents(&db.messages_for(&Viewer::Anonymous, &none(), now).unwrap()),
            vec!["hello"]
        );
    }

    #[test]
    fn inactive_messages_are_excluded() {
        let db = db();
        let now = Utc::now();
        let mut pm = saved(&db, "hello", Target::AllUsers, now);
        db.deactivate_message(&mut pm, now).unwrap();

        let mut future = PersistentMessage::new("later");
        future.target = Target::AllUsers;
        future.display_from = now + Duration::days(1);
        db.create_message(&mut future, &none(), now).unwrap();

        assert!(db.messages_for(&Viewer::Anonymous, &none(), now).unwrap().is_empty());
    }

    #[test]
    fn ordered_by_level_then_recency() {
        let db = db();
        let now = Utc::now();
        for (content, level, offset) in [
            ("old info", Level::Info, 3),
            ("new info", Level::Info, 1),
            ("error", Level::Error, 2),
            ("debug", Level::Debug, 0),
        ] {
            let mut pm = PersistentMessage::new(content);
            pm.target = Target::AllUsers;
            pm.level = level;
            pm.display_from = now - Duration::hours(1);
            db.create_message(&mut pm, &none(), now - Duration::minutes(offset))
                .unwrap();
        }

        assert_eq!(
            contents(&db.messages_for(&Viewer::Anonymous, &none(), now).unwrap()),
            vec!["error", "new info", "old info", "debug"]
        );
    }

    #[test]
    fn unknown_user_id_sees_only_broad_messages() {
        let db = db();
        let now = Utc::now();
        saved(&db, "members", Target::AuthenticatedUsers, now);
        let ghost = Viewer::User(beacon_types::UserIdentity::new(Uuid::new_v4(), "ghost"));
        assert_eq!(contents(&db.messages_for(&ghost, &none(), now).unwrap()), vec!["members"]);
    }
}
