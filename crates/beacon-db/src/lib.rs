pub mod audience;
pub mod ledger;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod queries;

use anyhow::Result;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

pub use messages::MessageFilter;

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Private in-memory database, used by tests and throwaway setups.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        f(&conn)
    }

    /// Runs `f` inside a transaction that commits when `f` succeeds.
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, Duration, Utc};
    use uuid::Uuid;

    use beacon_types::{CustomGroupRegistry, PersistentMessage, Target, UserIdentity, Viewer};

    use crate::Database;

    pub fn db() -> Database {
        Database::open_in_memory().expect("open in-memory db")
    }

    pub fn user(db: &Database, username: &str) -> Viewer {
        let id = Uuid::new_v4();
        db.create_user(&id.to_string(), username, "hash").expect("create user");
        Viewer::User(db.load_identity(id).expect("load").expect("exists"))
    }

    pub fn identity(viewer: &Viewer) -> &UserIdentity {
        viewer.user().expect("authenticated viewer")
    }

    pub fn saved(
        db: &Database,
        content: &str,
        target: Target,
        now: DateTime<Utc>,
    ) -> PersistentMessage {
        let mut pm = PersistentMessage::new(content);
        pm.target = target;
        pm.display_from = now - Duration::hours(1);
        db.create_message(&mut pm, &CustomGroupRegistry::new(), now)
            .expect("create message");
        pm
    }
}
