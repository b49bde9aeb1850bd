use std::ops::Deref;

use tracing::{debug, warn};

use crate::store::{Store, StoreError};

/// An open write transaction committed in chunks.
///
/// Every `size` completed units the chunk is committed and a new one begun,
/// so everything before the last chunk boundary survives an interruption.
/// A size of 0 commits only on [`Batch::finish`]. Dropping an unfinished
/// batch rolls the open chunk back.
pub struct Batch<'s> {
    store: &'s Store,
    size: usize,
    pending: usize,
    committed: usize,
    open: bool,
}

impl Store {
    pub fn begin_batch(&self, size: usize) -> Result<Batch<'_>, StoreError> {
        self.conn().execute_batch("BEGIN;")?;
        Ok(Batch {
            store: self,
            size,
            pending: 0,
            committed: 0,
            open: true,
        })
    }

    pub fn with_transaction<T, E, F>(&self, size: usize, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Batch<'_>) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut batch = self.begin_batch(size)?;
        let out = f(&mut batch)?;
        batch.finish()?;
        Ok(out)
    }
}

impl<'s> Batch<'s> {
    pub fn unit_done(&mut self) -> Result<(), StoreError> {
        self.pending += 1;
        if self.size > 0 && self.pending >= self.size {
            self.store.conn().execute_batch("COMMIT; BEGIN;")?;
            self.committed += self.pending;
            debug!(units = self.pending, total = self.committed, "committed chunk");
            self.pending = 0;
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<usize, StoreError> {
        self.store.conn().execute_batch("COMMIT;")?;
        self.open = false;
        self.committed += self.pending;
        self.pending = 0;
        Ok(self.committed)
    }

    pub fn committed_units(&self) -> usize {
        self.committed
    }
}

impl Deref for Batch<'_> {
    type Target = Store;

    fn deref(&self) -> &Store {
        self.store
    }
}

impl Drop for Batch<'_> {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        if self.store.conn().is_autocommit() {
            return;
        }
        warn!(units = self.pending, "rolling back unfinished chunk");
        if let Err(err) = self.store.conn().execute_batch("ROLLBACK;") {
            warn!("rollback failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::store::{Record, Store, StoreError};

    fn seeded() -> Store {
        let store = Store::open_in_memory().expect("store");
        store.ensure_table("t", ["n"], None).expect("table");
        store
    }

    #[test]
    fn dropped_batch_keeps_only_committed_chunks() {
        let store = seeded();
        {
            let mut batch = store.begin_batch(2).expect("batch");
            for n in 0..5i64 {
                batch.append("t", &Record::new().with("n", n)).expect("append");
                batch.unit_done().expect("unit");
            }
            assert_eq!(batch.committed_units(), 4);
        }
        assert_eq!(store.count("t").expect("count"), 4);
    }

    #[test]
    fn finish_commits_the_tail() {
        let store = seeded();
        let mut batch = store.begin_batch(50).expect("batch");
        for n in 0..3i64 {
            batch.append("t", &Record::new().with("n", n)).expect("append");
            batch.unit_done().expect("unit");
        }
        assert_eq!(batch.finish().expect("finish"), 3);
        assert_eq!(store.count("t").expect("count"), 3);
    }

    #[test]
    fn with_transaction_rolls_back_on_error() {
        let store = seeded();
        let result: Result<(), StoreError> = store.with_transaction(0, |batch| {
            batch.append("t", &Record::new().with("n", 1i64))?;
            batch.unit_done()?;
            batch.append("missing_table", &Record::new().with("n", 2i64))?;
            Ok(())
        });
        assert!(result.is_err());
        assert_eq!(store.count("t").expect("count"), 0);
    }
}
