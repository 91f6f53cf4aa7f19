//! Advisory per-plan leases. Workers on any replica take the lease before
//! finalizing a plan or deriving its prep steps; an expired lease is free.

use std::time::Duration;

use rusqlite::{Transaction, TransactionBehavior, params};
use supper_types::time;
use tracing::debug;

use crate::error::DbResult;
use crate::Database;

pub trait PlanLockManager {
    /// Takes the lease on `plan_id` for `lease`. Returns `false` when another
    /// holder has a live lease.
    fn acquire_plan_lock(&self, plan_id: &str, holder: &str, lease: Duration) -> DbResult<bool>;
    fn release_plan_lock(&self, plan_id: &str, holder: &str) -> DbResult<()>;
}

impl PlanLockManager for Database {
    fn acquire_plan_lock(&self, plan_id: &str, holder: &str, lease: Duration) -> DbResult<bool> {
        let now = time::now().timestamp_millis();
        let expires_at = now.saturating_add(i64::try_from(lease.as_millis()).unwrap_or(i64::MAX));
        self.with_conn_mut(|conn| {
            let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
            tx.execute(
                "DELETE FROM meal_plan_locks WHERE meal_plan_id = ?1 AND expires_at <= ?2",
                params![plan_id, now],
            )?;
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO meal_plan_locks (meal_plan_id, holder, expires_at) VALUES (?1, ?2, ?3)",
                params![plan_id, holder, expires_at],
            )?;
            tx.commit()?;
            debug!(meal_plan_id = %plan_id, holder, acquired = inserted == 1, "Plan lock");
            Ok(inserted == 1)
        })
    }

    fn release_plan_lock(&self, plan_id: &str, holder: &str) -> DbResult<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "DELETE FROM meal_plan_locks WHERE meal_plan_id = ?1 AND holder = ?2",
                params![plan_id, holder],
            )?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::open_temp;

    #[test]
    fn lease_is_exclusive_until_released() {
        let (_dir, db) = open_temp();
        let lease = Duration::from_secs(300);
        assert!(db.acquire_plan_lock("p1", "worker-a", lease).unwrap());
        assert!(!db.acquire_plan_lock("p1", "worker-b", lease).unwrap());
        assert!(db.acquire_plan_lock("p2", "worker-b", lease).unwrap());

        // Only the holder's release frees it.
        db.release_plan_lock("p1", "worker-b").unwrap();
        assert!(!db.acquire_plan_lock("p1", "worker-b", lease).unwrap());
        db.release_plan_lock("p1", "worker-a").unwrap();
        assert!(db.acquire_plan_lock("p1", "worker-b", lease).unwrap());
    }

    #[test]
    fn expired_leases_are_taken_over() {
        let (_dir, db) = open_temp();
        assert!(db.acquire_plan_lock("p1", "worker-a", Duration::ZERO).unwrap());
        assert!(db.acquire_plan_lock("p1", "worker-b", Duration::from_secs(60)).unwrap());
    }
}
