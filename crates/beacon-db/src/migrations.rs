use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (users, groups, persistent messages)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                username    TEXT NOT NULL UNIQUE,
                password    TEXT NOT NULL,
                is_staff    INTEGER NOT NULL DEFAULT 0,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE auth_groups (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                name        TEXT NOT NULL UNIQUE
            );

            CREATE TABLE user_groups (
                user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                group_id    INTEGER NOT NULL REFERENCES auth_groups(id) ON DELETE CASCADE,
                PRIMARY KEY (user_id, group_id)
            );

            CREATE TABLE user_attributes (
                user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                key         TEXT NOT NULL,
                value       TEXT NOT NULL,
                PRIMARY KEY (user_id, key)
            );

            CREATE TABLE persistent_messages (
                id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                content             TEXT NOT NULL,
                mark_content_safe   INTEGER NOT NULL DEFAULT 0,
                level               INTEGER NOT NULL DEFAULT 20,
                target              TEXT NOT NULL DEFAULT 'AUTHENTICATED_USERS',
                target_custom_group TEXT NOT NULL DEFAULT '',
                display_from        TEXT NOT NULL,
                display_until       TEXT,
                is_dismissable      INTEGER NOT NULL DEFAULT 1,
                custom_tags         TEXT NOT NULL DEFAULT '',
                created_at          TEXT NOT NULL,
                updated_at          TEXT NOT NULL
            );

            CREATE INDEX idx_persistent_messages_window
                ON persistent_messages(display_from, display_until);

            CREATE TABLE persistent_message_target_users (
                message_id  INTEGER NOT NULL REFERENCES persistent_messages(id) ON DELETE CASCADE,
                user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                PRIMARY KEY (message_id, user_id)
            );

            CREATE TABLE persistent_message_target_groups (
                message_id  INTEGER NOT NULL REFERENCES persistent_messages(id) ON DELETE CASCADE,
                group_id    INTEGER NOT NULL REFERENCES auth_groups(id) ON DELETE CASCADE,
                PRIMARY KEY (message_id, group_id)
            );

            -- at most one dismissal per (user, message)
            CREATE TABLE persistent_message_dismissals (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id         TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                message_id      INTEGER NOT NULL REFERENCES persistent_messages(id) ON DELETE CASCADE,
                dismissed_at    TEXT NOT NULL,
                UNIQUE(user_id, message_id)
            );

            CREATE INDEX idx_dismissals_message
                ON persistent_message_dismissals(message_id);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();

        let versions: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(versions, 1);
    }
}
