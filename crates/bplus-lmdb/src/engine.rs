use bplus_core::{
    Engine, EngineConfig, EngineError, EngineResult, Key, Status, SyncMode, UpdateDecider, Value,
    ValueDecider, ValueRecord, ValueRef, VisitFn,
};
use lmdb::{
    Cursor, Database, DatabaseFlags, Environment, EnvironmentFlags, RwTransaction, Transaction, WriteFlags,
};
use std::path::{Path, PathBuf};

use crate::error::map_lmdb_err;
use crate::keys::{decode_version, encode_version, key_to_ref, meta_keys, ref_to_key, FIRST_REF, NO_REF};
use crate::scan::{dead_versions, live_refs, scan_range};

/// Metadata about an LMDB engine instance
#[derive(Debug, Clone)]
pub struct EngineMeta {
    /// Next ref to be assigned
    pub next_ref: u64,

    /// Number of live keys
    pub keys: usize,

    /// Number of stored versions, live or superseded
    pub versions: usize,

    /// Schema version
    pub schema_version: u32,

    /// Creation timestamp (ISO 8601)
    pub created_at: String,

    /// Last updated timestamp (ISO 8601)
    pub updated_at: String,
}

/// Append-only B+tree engine on LMDB
///
/// Every write appends a new version record linked to the version it
/// replaces, so `get_previous` can walk history until `compact` drops
/// versions no longer reachable from the index.
pub struct LmdbEngine {
    env: Environment,
    index_db: Database,
    values_db: Database,
    meta_db: Database,
    path: PathBuf,
}

impl LmdbEngine {
    /// Get the directory this engine was opened at
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read engine metadata
    pub fn meta(&self) -> EngineResult<EngineMeta> {
        let txn = self.env.begin_ro_txn().map_err(map_lmdb_err)?;

        let next_ref = self.read_next_ref(&txn)?;
        let schema_version = self
            .get_meta(&txn, meta_keys::SCHEMA_VERSION)?
            .and_then(|s| s.parse().ok())
            .unwrap_or(1);
        let created_at = self
            .get_meta(&txn, meta_keys::CREATED_AT)?
            .unwrap_or_else(|| chrono::Utc::now().to_rfc3339());
        let updated_at = self
            .get_meta(&txn, meta_keys::UPDATED_AT)?
            .unwrap_or_else(|| chrono::Utc::now().to_rfc3339());

        let keys = live_refs(&txn, self.index_db)?.len();
        let versions = {
            let mut cursor = txn.open_ro_cursor(self.values_db).map_err(map_lmdb_err)?;
            cursor.iter_start().count()
        };

        Ok(EngineMeta {
            next_ref,
            keys,
            versions,
            schema_version,
            created_at,
            updated_at,
        })
    }

    fn read_next_ref<T: Transaction>(&self, txn: &T) -> EngineResult<u64> {
        match txn.get(self.meta_db, &meta_keys::NEXT_REF) {
            Ok(bytes) => key_to_ref(bytes)
                .map(ValueRef::raw)
                .ok_or_else(|| EngineError::new(Status::FILE_READ, "malformed next_ref")),
            Err(lmdb::Error::NotFound) => Ok(FIRST_REF),
            Err(e) => Err(map_lmdb_err(e)),
        }
    }

    fn get_meta<T: Transaction>(&self, txn: &T, key: &str) -> EngineResult<Option<String>> {
        match txn.get(self.meta_db, &key) {
            Ok(bytes) => {
                let value = std::str::from_utf8(bytes)
                    .map_err(|e| EngineError::new(Status::FILE_READ, e.to_string()))?
                    .to_string();
                Ok(Some(value))
            }
            Err(lmdb::Error::NotFound) => Ok(None),
            Err(e) => Err(map_lmdb_err(e)),
        }
    }

    fn touch(&self, txn: &mut RwTransaction<'_>) -> EngineResult<()> {
        txn.put(
            self.meta_db,
            &meta_keys::UPDATED_AT,
            &chrono::Utc::now().to_rfc3339(),
            WriteFlags::empty(),
        )
        .map_err(map_lmdb_err)
    }

    /// Ref of the current version of `key`, if any
    fn current_ref<T: Transaction>(&self, txn: &T, key: &[u8]) -> EngineResult<Option<ValueRef>> {
        match txn.get(self.index_db, &key) {
            Ok(bytes) => key_to_ref(bytes)
                .map(Some)
                .ok_or_else(|| EngineError::new(Status::FILE_READ, "malformed index entry")),
            Err(lmdb::Error::NotFound) => Ok(None),
            Err(e) => Err(map_lmdb_err(e)),
        }
    }

    /// Borrow the value bytes and previous ref of a stored version
    fn read_version<'t, T: Transaction>(
        &self,
        txn: &'t T,
        reference: ValueRef,
    ) -> EngineResult<(u64, &'t [u8])> {
        let stored = txn
            .get(self.values_db, &ref_to_key(reference))
            .map_err(map_lmdb_err)?;
        decode_version(stored)
            .ok_or_else(|| EngineError::new(Status::FILE_READ, "malformed version record"))
    }

    /// Append a new version of `key` linked to its current one
    fn append_version(
        &self,
        txn: &mut RwTransaction<'_>,
        key: &[u8],
        value: &[u8],
    ) -> EngineResult<ValueRef> {
        let previous = self.current_ref(&*txn, key)?.map_or(NO_REF, ValueRef::raw);
        let reference = ValueRef::new(self.read_next_ref(&*txn)?);

        txn.put(
            self.values_db,
            &ref_to_key(reference),
            &encode_version(previous, value),
            WriteFlags::empty(),
        )
        .map_err(map_lmdb_err)?;
        txn.put(self.index_db, &key, &ref_to_key(reference), WriteFlags::empty())
            .map_err(map_lmdb_err)?;
        txn.put(
            self.meta_db,
            &meta_keys::NEXT_REF,
            &ref_to_key(ValueRef::new(reference.raw() + 1)),
            WriteFlags::empty(),
        )
        .map_err(map_lmdb_err)?;

        Ok(reference)
    }

    /// Apply one update inside an open write transaction.
    ///
    /// Returns false when the decision rejected the write.
    fn update_in(
        &self,
        txn: &mut RwTransaction<'_>,
        key: &[u8],
        value: &[u8],
        decide: &mut UpdateDecider<'_>,
    ) -> EngineResult<bool> {
        let accepted = match self.current_ref(&*txn, key)? {
            Some(reference) => {
                let (_, previous) = self.read_version(&*txn, reference)?;
                decide(previous, value).is_accept()
            }
            None => true,
        };
        if accepted {
            self.append_version(txn, key, value)?;
        }
        Ok(accepted)
    }

    fn commit(&self, mut txn: RwTransaction<'_>) -> EngineResult<()> {
        self.touch(&mut txn)?;
        txn.commit().map_err(map_lmdb_err)
    }
}

impl Engine for LmdbEngine {
    fn open(path: &Path, config: &EngineConfig) -> EngineResult<Self> {
        let mut env_builder = Environment::new();
        env_builder.set_max_dbs(3); // index, values, meta
        env_builder.set_map_size(config.map_size);
        env_builder.set_max_readers(config.max_readers);

        // Read transactions may be opened from pooled worker threads and from
        // the caller inside a scan callback
        let mut flags = EnvironmentFlags::NO_TLS;
        match config.sync_mode {
            SyncMode::Full => {}
            SyncMode::NoMetaSync => {
                flags.insert(EnvironmentFlags::NO_META_SYNC);
            }
            SyncMode::NoSync => {
                flags.insert(EnvironmentFlags::NO_SYNC);
            }
        }
        env_builder.set_flags(flags);

        let env = env_builder.open(path).map_err(map_lmdb_err)?;

        let index_db = env
            .create_db(Some("index"), DatabaseFlags::empty())
            .map_err(map_lmdb_err)?;
        let values_db = env
            .create_db(Some("values"), DatabaseFlags::empty())
            .map_err(map_lmdb_err)?;
        let meta_db = env
            .create_db(Some("meta"), DatabaseFlags::empty())
            .map_err(map_lmdb_err)?;

        // Initialize metadata if needed
        {
            let mut txn = env.begin_rw_txn().map_err(map_lmdb_err)?;

            if txn.get(meta_db, &meta_keys::NEXT_REF).is_err() {
                txn.put(
                    meta_db,
                    &meta_keys::NEXT_REF,
                    &ref_to_key(ValueRef::new(FIRST_REF)),
                    WriteFlags::empty(),
                )
                .map_err(map_lmdb_err)?;
            }

            if txn.get(meta_db, &meta_keys::SCHEMA_VERSION).is_err() {
                txn.put(meta_db, &meta_keys::SCHEMA_VERSION, &"1", WriteFlags::empty())
                    .map_err(map_lmdb_err)?;
            }

            let now = chrono::Utc::now().to_rfc3339();
            if txn.get(meta_db, &meta_keys::CREATED_AT).is_err() {
                txn.put(meta_db, &meta_keys::CREATED_AT, &now, WriteFlags::empty())
                    .map_err(map_lmdb_err)?;
            }
            txn.put(meta_db, &meta_keys::UPDATED_AT, &now, WriteFlags::empty())
                .map_err(map_lmdb_err)?;

            txn.commit().map_err(map_lmdb_err)?;
        }

        tracing::debug!(path = %path.display(), "LMDB engine opened");

        Ok(Self {
            env,
            index_db,
            values_db,
            meta_db,
            path: path.to_path_buf(),
        })
    }

    fn close(&self) -> EngineResult<()> {
        // The environment itself closes on drop; make sure everything is on disk
        self.env.sync(true).map_err(map_lmdb_err)
    }

    fn set(&self, key: &[u8], value: &[u8]) -> EngineResult<()> {
        let mut txn = self.env.begin_rw_txn().map_err(map_lmdb_err)?;
        self.append_version(&mut txn, key, value)?;
        self.commit(txn)
    }

    fn bulk_set(&self, pairs: &[(Key, Value)]) -> EngineResult<()> {
        let mut txn = self.env.begin_rw_txn().map_err(map_lmdb_err)?;
        for (key, value) in pairs {
            self.append_version(&mut txn, key, value)?;
        }
        self.commit(txn)
    }

    fn update(
        &self,
        key: &[u8],
        value: &[u8],
        decide: &mut UpdateDecider<'_>,
    ) -> EngineResult<()> {
        let mut txn = self.env.begin_rw_txn().map_err(map_lmdb_err)?;
        if !self.update_in(&mut txn, key, value, decide)? {
            txn.abort();
            return Err(EngineError::new(
                Status::UPDATE_CONFLICT,
                "update rejected by decision callback",
            ));
        }
        self.commit(txn)
    }

    fn bulk_update(
        &self,
        pairs: &[(Key, Value)],
        decide: &mut UpdateDecider<'_>,
    ) -> EngineResult<()> {
        let mut txn = self.env.begin_rw_txn().map_err(map_lmdb_err)?;
        for (index, (key, value)) in pairs.iter().enumerate() {
            if !self.update_in(&mut txn, key, value, decide)? {
                txn.abort();
                return Err(EngineError::new(
                    Status::UPDATE_CONFLICT,
                    format!("bulk update rejected at pair {}", index),
                ));
            }
        }
        self.commit(txn)
    }

    fn get_with(&self, key: &[u8], read: &mut dyn FnMut(&[u8], ValueRef)) -> EngineResult<()> {
        let txn = self.env.begin_ro_txn().map_err(map_lmdb_err)?;
        let reference = self
            .current_ref(&txn, key)?
            .ok_or_else(EngineError::not_found)?;
        let (_, value) = self.read_version(&txn, reference)?;
        read(value, reference);
        Ok(())
    }

    fn get_previous(&self, reference: ValueRef) -> EngineResult<ValueRecord> {
        let txn = self.env.begin_ro_txn().map_err(map_lmdb_err)?;
        let (previous, _) = self.read_version(&txn, reference)?;
        if previous == NO_REF {
            return Err(EngineError::new(Status::NOT_FOUND, "no previous version"));
        }

        let previous = ValueRef::new(previous);
        let (_, value) = self.read_version(&txn, previous)?;
        Ok(ValueRecord {
            value: Value::copy_from(value),
            reference: previous,
        })
    }

    fn remove(&self, key: &[u8]) -> EngineResult<()> {
        let mut txn = self.env.begin_rw_txn().map_err(map_lmdb_err)?;
        txn.del(self.index_db, &key, None).map_err(map_lmdb_err)?;
        self.commit(txn)
    }

    fn remove_conditional(&self, key: &[u8], decide: &mut ValueDecider<'_>) -> EngineResult<()> {
        let mut txn = self.env.begin_rw_txn().map_err(map_lmdb_err)?;
        let reference = self
            .current_ref(&txn, key)?
            .ok_or_else(EngineError::not_found)?;
        let accepted = {
            let (_, value) = self.read_version(&txn, reference)?;
            decide(value).is_accept()
        };
        if !accepted {
            txn.abort();
            return Err(EngineError::new(
                Status::REMOVE_CONFLICT,
                "remove rejected by decision callback",
            ));
        }
        txn.del(self.index_db, &key, None).map_err(map_lmdb_err)?;
        self.commit(txn)
    }

    fn compact(&self) -> EngineResult<u64> {
        let mut txn = self.env.begin_rw_txn().map_err(map_lmdb_err)?;

        let live = live_refs(&txn, self.index_db)?;
        let dead = dead_versions(&txn, self.values_db, &live)?;
        for ref_key in &dead {
            txn.del(self.values_db, ref_key, None)
                .map_err(|e| EngineError::new(Status::COMPACT, e.to_string()))?;
        }
        self.commit(txn)?;

        tracing::info!(
            path = %self.path.display(),
            live = live.len(),
            reclaimed = dead.len(),
            "LMDB engine compacted"
        );
        Ok(dead.len() as u64)
    }

    fn range(&self, start: &[u8], end: &[u8], visit: &mut VisitFn<'_>) -> EngineResult<()> {
        let txn = self.env.begin_ro_txn().map_err(map_lmdb_err)?;
        scan_range(&txn, self.index_db, self.values_db, start, end, visit)?;
        Ok(())
    }
}
