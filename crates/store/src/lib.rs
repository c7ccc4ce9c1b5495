//! The transactional, single-writer index store (component F): persists the commit frontier
//! and one encoded envelope per feature blob.
//!
//! Schema evolution is tracked via SQLite's `user_version` pragma rather than a hand-rolled
//! version table, so the on-disk format can change across releases without a migration the
//! engine itself has to remember to consult (§10.3).

use std::path::Path;

use anyhow::{bail, Context, Result};
use indoc::indoc;
use rusqlite::{Connection, Transaction};
use thiserror::Error;
use tracing::{debug, debug_span};

use spatialidx_envelope::{Envelope, EnvelopeCodec};
use spatialidx_oid::Oid;

const CURRENT_SCHEMA_VERSION: u64 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database at {path} has unknown schema version {version}; this build only understands versions up to {max}")]
    UnknownSchemaVersion { path: String, version: u64, max: u64 },
    #[error("feature_envelopes rows have inconsistent envelope byte lengths: {a} vs {b}")]
    InconsistentEnvelopeWidth { a: usize, b: usize },
}

/// A single-file, WAL-journaled SQLite database holding the commit frontier and feature
/// envelopes for one indexed repository.
///
/// Like the object database, a `Store` mediates access through one connection and is not
/// `Sync`; the orchestrator funnels all writes through a single thread (§5, §10.5).
pub struct Store {
    path: std::path::PathBuf,
    conn: Connection,
    codec: EnvelopeCodec,
}

impl Store {
    /// Opens the store at `path`, creating it (and its schema) if it doesn't exist yet.
    ///
    /// `cache_size` is passed straight through to SQLite's `pragma cache_size` (negative values
    /// are a size in kibibytes, positive values a page count; see
    /// <https://sqlite.org/pragma.html#pragma_cache_size>).
    pub fn open(path: &Path, cache_size: i64) -> Result<Self> {
        let conn = Self::new_connection(path, cache_size)
            .with_context(|| format!("failed to open database at {}", path.display()))?;
        let mut store = Store {
            path: path.to_path_buf(),
            conn,
            codec: EnvelopeCodec::default(),
        };
        store
            .migrate()
            .with_context(|| format!("failed to migrate database at {}", path.display()))?;
        store.codec = store.infer_codec()?;
        Ok(store)
    }

    fn new_connection(path: &Path, cache_size: i64) -> Result<Connection> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "wal")?; // https://www.sqlite.org/wal.html
        conn.pragma_update(None, "synchronous", "normal")?; // https://sqlite.org/pragma.html#pragma_synchronous
        conn.pragma_update(None, "foreign_keys", "on")?;
        conn.pragma_update(None, "cache_size", cache_size)?; // https://sqlite.org/pragma.html#pragma_cache_size
        Ok(conn)
    }

    fn migrate(&mut self) -> Result<()> {
        let _span = debug_span!("Store::migrate", path = %self.path.display()).entered();
        let tx = self.conn.transaction()?;

        let user_version: u64 = tx.pragma_query_value(None, "user_version", |r| r.get(0))?;
        if user_version > CURRENT_SCHEMA_VERSION {
            bail!(StoreError::UnknownSchemaVersion {
                path: self.path.display().to_string(),
                version: user_version,
                max: CURRENT_SCHEMA_VERSION,
            });
        }

        if user_version == 0 {
            debug!("Migrating database schema from version 0 to {CURRENT_SCHEMA_VERSION}");
            Self::create_schema(&tx)?;
            tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)?;
        }

        tx.commit()?;
        Ok(())
    }

    fn create_schema(tx: &Transaction) -> Result<()> {
        tx.execute_batch(indoc! {r#"
            create table if not exists commits
            -- The persisted commit frontier: the minimal set of commits such that every
            -- ancestor, inclusive, is considered indexed.
            (
                commit_id blob primary key
            );

            create table if not exists feature_envelopes
            -- One conservative WGS84 envelope per feature blob, fixed-width encoded.
            (
                blob_id  blob primary key,
                envelope blob not null
            );
        "#})?;
        Ok(())
    }

    /// Infers the codec's bit width from any existing row's envelope length, falling back to
    /// the default when the table is empty (I3).
    fn infer_codec(&self) -> Result<EnvelopeCodec> {
        let width: Option<usize> = self
            .conn
            .query_row(
                "select length(envelope) from feature_envelopes limit 1",
                [],
                |r| r.get::<_, i64>(0),
            )
            .map(|n| Some(n as usize))
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                e => Err(e),
            })?;

        match width {
            None => Ok(EnvelopeCodec::default()),
            Some(bytes) => {
                let bits_per_coordinate = (bytes * 8 / 4) as u32;
                Ok(EnvelopeCodec::new(bits_per_coordinate)?)
            }
        }
    }

    pub fn codec(&self) -> EnvelopeCodec {
        self.codec
    }

    /// Drops and recreates both tables, used only when the caller asked for `clear_existing`.
    pub fn drop_tables(&mut self) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute_batch("drop table if exists commits; drop table if exists feature_envelopes;")?;
        Self::create_schema(&tx)?;
        tx.commit()?;
        Ok(())
    }

    /// The commit frontier persisted by the previous successful run, or `None` if there is none
    /// (a fresh store, or one just cleared).
    pub fn read_frontier(&self) -> Result<Option<Vec<Oid>>> {
        let mut stmt = self.conn.prepare("select commit_id from commits")?;
        let rows: Vec<Oid> = stmt
            .query_map([], |r| r.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        if rows.is_empty() {
            Ok(None)
        } else {
            Ok(Some(rows))
        }
    }

    /// Atomically replaces the persisted commit frontier. Called once, at the end of a
    /// successful indexing run, so a run that's interrupted leaves the previous frontier intact.
    ///
    /// Opens its own transaction when called standalone (as the unit tests do), but runs
    /// directly against the connection when already inside one — as it is when the orchestrator
    /// calls it from within [`Store::with_transaction`] — since SQLite rejects a nested `BEGIN`.
    pub fn replace_frontier(&mut self, frontier: &[Oid]) -> Result<()> {
        if self.conn.is_autocommit() {
            let tx = self.conn.transaction()?;
            Self::replace_frontier_on(&tx, frontier)?;
            tx.commit()?;
            Ok(())
        } else {
            Self::replace_frontier_on(&self.conn, frontier)
        }
    }

    fn replace_frontier_on(conn: &Connection, frontier: &[Oid]) -> Result<()> {
        conn.execute("delete from commits", [])?;
        let mut stmt = conn.prepare("insert into commits (commit_id) values (?1)")?;
        for commit in frontier {
            stmt.execute((commit,))?;
        }
        Ok(())
    }

    /// Inserts or replaces the envelope for one feature blob (INSERT OR REPLACE semantics;
    /// envelopes are never deleted individually).
    pub fn upsert_envelope(&mut self, blob_id: Oid, envelope: &Envelope) -> Result<()> {
        let encoded = self.codec.encode(envelope)?;
        self.conn.execute(
            "insert into feature_envelopes (blob_id, envelope) values (?1, ?2)
             on conflict(blob_id) do update set envelope = excluded.envelope",
            (&blob_id, &encoded),
        )?;
        Ok(())
    }

    /// Runs `body` inside one transaction, committing on success and rolling back on error.
    /// The orchestrator batches many [`Store::upsert_envelope`] calls through this so a crash
    /// mid-run can't leave a half-written batch visible (§4.G, §10.5).
    pub fn with_transaction<T>(&mut self, body: impl FnOnce(&mut Store) -> Result<T>) -> Result<T> {
        self.conn.execute("begin immediate", [])?;
        match body(self) {
            Ok(value) => {
                self.conn.execute("commit", [])?;
                Ok(value)
            }
            Err(e) => {
                let _ = self.conn.execute("rollback", []);
                Err(e)
            }
        }
    }

    /// Returns the number of rows currently in `feature_envelopes`, used for progress reporting
    /// and diagnostics.
    pub fn feature_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("select count(*) from feature_envelopes", [], |r| r.get(0))?;
        Ok(count as u64)
    }

    /// Runs SQLite's `ANALYZE` to refresh query planner statistics. Not required for
    /// correctness; called at the end of a run the way the reference store does.
    pub fn analyze(&mut self) -> Result<()> {
        self.conn.execute_batch("analyze;")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn oid(n: u8) -> Oid {
        let mut bytes = [0u8; 20];
        bytes[0] = n;
        Oid::from_bytes(bytes)
    }

    #[test]
    fn fresh_store_has_no_frontier() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("index.db"), -262_144).unwrap();
        assert_eq!(store.read_frontier().unwrap(), None);
    }

    #[test]
    fn frontier_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open(&dir.path().join("index.db"), -262_144).unwrap();
        let frontier = vec![oid(1), oid(2)];
        store.replace_frontier(&frontier).unwrap();

        let mut read_back = store.read_frontier().unwrap().unwrap();
        read_back.sort();
        let mut expected = frontier.clone();
        expected.sort();
        assert_eq!(read_back, expected);
    }

    #[test]
    fn replacing_frontier_discards_the_previous_one() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open(&dir.path().join("index.db"), -262_144).unwrap();
        store.replace_frontier(&[oid(1)]).unwrap();
        store.replace_frontier(&[oid(2)]).unwrap();
        assert_eq!(store.read_frontier().unwrap(), Some(vec![oid(2)]));
    }

    #[test]
    fn upsert_then_reopen_infers_the_same_codec() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");
        {
            let mut store = Store::open(&path, -262_144).unwrap();
            store
                .upsert_envelope(oid(1), &Envelope::new(1.0, 2.0, 3.0, 4.0))
                .unwrap();
        }
        let reopened = Store::open(&path, -262_144).unwrap();
        assert_eq!(reopened.codec().bits_per_coordinate(), EnvelopeCodec::default().bits_per_coordinate());
        assert_eq!(reopened.feature_count().unwrap(), 1);
    }

    #[test]
    fn upsert_replaces_existing_row() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open(&dir.path().join("index.db"), -262_144).unwrap();
        store.upsert_envelope(oid(1), &Envelope::new(0.0, 0.0, 1.0, 1.0)).unwrap();
        store.upsert_envelope(oid(1), &Envelope::new(5.0, 5.0, 6.0, 6.0)).unwrap();
        assert_eq!(store.feature_count().unwrap(), 1);
    }

    /// The orchestrator calls [`Store::replace_frontier`] from inside [`Store::with_transaction`]
    /// (§4.G); this must not try to open a second, nested SQLite transaction.
    #[test]
    fn replace_frontier_works_inside_an_existing_transaction() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open(&dir.path().join("index.db"), -262_144).unwrap();

        store
            .with_transaction(|store| {
                store.replace_frontier(&[oid(3)])?;
                store.upsert_envelope(oid(9), &Envelope::new(0.0, 0.0, 1.0, 1.0))?;
                Ok(())
            })
            .unwrap();

        assert_eq!(store.read_frontier().unwrap(), Some(vec![oid(3)]));
        assert_eq!(store.feature_count().unwrap(), 1);
    }

    #[test]
    fn clear_existing_drops_both_tables() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open(&dir.path().join("index.db"), -262_144).unwrap();
        store.replace_frontier(&[oid(1)]).unwrap();
        store.upsert_envelope(oid(2), &Envelope::new(0.0, 0.0, 1.0, 1.0)).unwrap();

        store.drop_tables().unwrap();

        assert_eq!(store.read_frontier().unwrap(), None);
        assert_eq!(store.feature_count().unwrap(), 0);
    }
}
