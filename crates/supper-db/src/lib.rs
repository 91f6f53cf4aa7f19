//! SQLite persistence: one serialized writer connection plus a round-robin
//! pool of read-only connections. Every query filters archived rows unless
//! the caller explicitly asks for them.

pub mod error;
pub mod households;
pub mod invitations;
pub mod locks;
pub mod meal_plans;
pub mod meals;
pub mod migrations;
pub mod prep_steps;
pub mod recipes;
pub mod record;
pub mod sessions;
pub mod users;
pub mod valid;
pub mod votes;
pub mod webhooks;

use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use rusqlite::Connection;
use tracing::info;

pub use error::{DbError, DbResult};
pub use households::HouseholdDataManager;
pub use invitations::HouseholdInvitationDataManager;
pub use locks::PlanLockManager;
pub use meal_plans::MealPlanDataManager;
pub use prep_steps::AdvancedPrepStepDataManager;
pub use record::{DataManager, Record, Scope, Write};
pub use sessions::{SessionDataManager, SessionRecord};
pub use users::UserDataManager;
pub use valid::SearchableDataManager;
pub use votes::MealPlanOptionVoteDataManager;
pub use webhooks::{DeliveryFailure, WebhookDataManager};

pub const DEFAULT_READER_POOL_SIZE: usize = 4;

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub reader_pool_size: usize,
    pub run_migrations: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            reader_pool_size: DEFAULT_READER_POOL_SIZE,
            run_migrations: true,
        }
    }
}

pub struct Database {
    writer: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
    reader_idx: AtomicUsize,
}

impl Database {
    pub fn open(path: &Path, config: &DbConfig) -> anyhow::Result<Self> {
        let writer = Connection::open(path)?;

        // WAL mode for concurrent reads
        writer.pragma_update(None, "journal_mode", "WAL")?;
        writer.pragma_update(None, "foreign_keys", "ON")?;
        writer.busy_timeout(std::time::Duration::from_secs(5))?;

        if config.run_migrations {
            migrations::run(&writer)?;
        }

        let pool_size = config.reader_pool_size.max(1);
        let mut readers = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            let conn = Connection::open_with_flags(
                path,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.busy_timeout(std::time::Duration::from_secs(5))?;
            readers.push(Mutex::new(conn));
        }

        info!("Database opened at {} (1 writer + {} readers)", path.display(), pool_size);
        Ok(Self {
            writer: Mutex::new(writer),
            readers,
            reader_idx: AtomicUsize::new(0),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce(&Connection) -> DbResult<T>,
    {
        let idx = self.reader_idx.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        let conn = self.readers[idx]
            .lock()
            .map_err(|e| anyhow::anyhow!("Reader lock poisoned: {}", e))?;
        f(&conn)
    }

    pub fn with_conn_mut<F, T>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce(&Connection) -> DbResult<T>,
    {
        let conn = self
            .writer
            .lock()
            .map_err(|e| anyhow::anyhow!("Writer lock poisoned: {}", e))?;
        f(&conn)
    }

    /// Round-trips a trivial query on a reader; used by the readiness probe.
    pub fn ping(&self) -> DbResult<()> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |r| r.get::<_, i64>(0))?;
            Ok(())
        })
    }
}
