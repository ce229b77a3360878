//! Buffered unit of work over the worker database
//!
//! Repositories stage writes here instead of touching the connection; the
//! whole buffer is applied inside one SQLite transaction at commit time and
//! dropped wholesale on rollback. Reads always go straight to the database,
//! which is what lets the execution loop observe a stage flipped by another
//! actor while its own writes are still pending.

use anyhow::Result;
use rusqlite::Connection;
use tracing::debug;

use crate::db::Db;

/// One deferred write, applied at commit time
pub type StagedWrite = Box<dyn FnOnce(&Connection) -> Result<()> + Send>;

/// Transactional envelope for one job attempt
pub struct UnitOfWork {
    db: Db,
    pending: Vec<StagedWrite>,
}

impl UnitOfWork {
    /// Open a fresh envelope; nothing touches the database until commit
    pub fn begin(db: Db) -> Self {
        Self {
            db,
            pending: Vec::new(),
        }
    }

    /// Stage a write for the next commit
    pub fn stage(&mut self, op: impl FnOnce(&Connection) -> Result<()> + Send + 'static) {
        self.pending.push(Box::new(op));
    }

    /// Number of staged writes
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Apply every staged write inside one transaction.
    /// Returns the number of writes applied.
    pub fn commit(mut self) -> Result<usize> {
        let count = self.pending.len();
        if count == 0 {
            return Ok(0);
        }

        let mut conn = self.db.conn();
        let tx = conn.transaction()?;
        for op in self.pending.drain(..) {
            op(&tx)?;
        }
        tx.commit()?;

        debug!("unit of work committed ({} writes)", count);
        Ok(count)
    }

    /// Discard every staged write. The database was never touched.
    pub fn rollback(mut self) {
        let count = self.pending.len();
        self.pending.clear();
        debug!("unit of work rolled back ({} writes discarded)", count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn scratch_db() -> (tempfile::TempDir, Db) {
        let dir = tempdir().unwrap();
        let db = Db::open(&dir.path().join("uow.db")).unwrap();
        (dir, db)
    }

    fn target_count(db: &Db) -> i64 {
        db.conn()
            .query_row("SELECT COUNT(*) FROM targets", [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_commit_applies_staged_writes() {
        let (_dir, db) = scratch_db();
        let mut uow = UnitOfWork::begin(db.clone());

        uow.stage(|conn| {
            conn.execute("INSERT INTO targets (name) VALUES ('a')", [])?;
            Ok(())
        });
        uow.stage(|conn| {
            conn.execute("INSERT INTO targets (name) VALUES ('b')", [])?;
            Ok(())
        });

        assert_eq!(target_count(&db), 0);
        assert_eq!(uow.commit().unwrap(), 2);
        assert_eq!(target_count(&db), 2);
    }

    #[test]
    fn test_rollback_leaves_no_trace() {
        let (_dir, db) = scratch_db();
        let mut uow = UnitOfWork::begin(db.clone());

        uow.stage(|conn| {
            conn.execute("INSERT INTO targets (name) VALUES ('a')", [])?;
            Ok(())
        });
        uow.rollback();

        assert_eq!(target_count(&db), 0);
    }

    #[test]
    fn test_failing_write_aborts_whole_commit() {
        let (_dir, db) = scratch_db();
        let mut uow = UnitOfWork::begin(db.clone());

        uow.stage(|conn| {
            conn.execute("INSERT INTO targets (name) VALUES ('a')", [])?;
            Ok(())
        });
        uow.stage(|_conn| anyhow::bail!("boom"));

        assert!(uow.commit().is_err());
        assert_eq!(target_count(&db), 0);
    }
}
