//! Sled-backed [`SessionStore`] implementation (§4.1).
//!
//! `sled::Db` supplies crash-safe persistence and refuses to open a database
//! directory already locked by another process, which we surface as
//! [`ErrorCode::AlreadyInUse`]. Per-session serialization of
//! `update_atomic`/`compare_and_swap` is implemented with a side table of
//! `tokio::sync::Mutex`, one per [`SessionId`], so distinct sessions never
//! contend and a single session's mutations are linearizable.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use ctnr_core::error::{CtnrError, ErrorCode, ErrorDomain, Result};
use ctnr_core::session::{Session, SessionFilters, SessionId, SessionStatus, StoreStats};
use ctnr_core::store::{check_cancelled, SessionStore};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

const SCHEMA_VERSION: u32 = 1;
const SCHEMA_VERSION_KEY: &str = "__schema_version__";

pub struct SledSessionStore {
    db: sled::Db,
    locks: StdMutex<HashMap<SessionId, Arc<AsyncMutex<()>>>>,
    max_sessions: usize,
}

impl SledSessionStore {
    /// Open (or create) the store at `path`. Fails with `ALREADY_IN_USE` if
    /// another process already holds the sled lock file, and with
    /// `SCHEMA_VERSION_MISMATCH` if an existing store was written by an
    /// incompatible schema version.
    pub fn open(path: &str, max_sessions: usize) -> Result<Self> {
        let db = sled::open(path).map_err(|e| match e {
            sled::Error::Io(io_err) if io_err.kind() == std::io::ErrorKind::WouldBlock => CtnrError::new(
                ErrorCode::AlreadyInUse,
                ErrorDomain::Store,
                format!("store at {path} is already open in another process"),
            ),
            other => CtnrError::new(ErrorCode::IoError, ErrorDomain::Store, format!("failed to open store at {path}: {other}")),
        })?;

        match db.get(SCHEMA_VERSION_KEY).map_err(store_io_err)? {
            Some(bytes) => {
                let existing: u32 = serde_json::from_slice(&bytes).unwrap_or(0);
                if existing != SCHEMA_VERSION {
                    return Err(CtnrError::new(
                        ErrorCode::SchemaVersionMismatch,
                        ErrorDomain::Store,
                        format!("store schema version {existing} does not match supported version {SCHEMA_VERSION}"),
                    ));
                }
            }
            None => {
                db.insert(SCHEMA_VERSION_KEY, serde_json::to_vec(&SCHEMA_VERSION).unwrap())
                    .map_err(store_io_err)?;
            }
        }

        Ok(Self {
            db,
            locks: StdMutex::new(HashMap::new()),
            max_sessions,
        })
    }

    fn lock_for(&self, id: &SessionId) -> Arc<AsyncMutex<()>> {
        self.locks.lock().unwrap().entry(id.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    fn get_raw(&self, id: &SessionId) -> Result<Option<Session>> {
        match self.db.get(id.0.as_bytes()).map_err(store_io_err)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_raw(&self, session: &Session) -> Result<()> {
        let bytes = serde_json::to_vec(session)?;
        self.db.insert(session.id.0.as_bytes(), bytes).map_err(store_io_err)?;
        Ok(())
    }

    fn all_sessions(&self) -> Result<Vec<Session>> {
        let mut sessions = Vec::new();
        for item in self.db.iter() {
            let (key, value) = item.map_err(store_io_err)?;
            if key.as_ref() == SCHEMA_VERSION_KEY.as_bytes() {
                continue;
            }
            sessions.push(serde_json::from_slice::<Session>(&value)?);
        }
        Ok(sessions)
    }

    /// Evict least-recently-updated non-active sessions first, then oldest
    /// active sessions, until under `max_sessions`. Runs before `create`
    /// when the store is already at capacity.
    fn evict_for_capacity(&self) -> Result<()> {
        let mut sessions = self.all_sessions()?;
        if sessions.len() < self.max_sessions {
            return Ok(());
        }

        sessions.sort_by(|a, b| {
            let rank = |s: &Session| matches!(s.status, SessionStatus::Active) as u8;
            rank(a).cmp(&rank(b)).then(a.updated_at.cmp(&b.updated_at))
        });

        let to_evict = sessions.len() - self.max_sessions + 1;
        for session in sessions.into_iter().take(to_evict) {
            self.db.remove(session.id.0.as_bytes()).map_err(store_io_err)?;
        }
        Ok(())
    }
}

fn store_io_err(e: sled::Error) -> CtnrError {
    CtnrError::new(ErrorCode::IoError, ErrorDomain::Store, format!("store error: {e}"))
}

#[async_trait]
impl SessionStore for SledSessionStore {
    async fn create(&self, session: Session, cancel: &CancellationToken) -> Result<()> {
        check_cancelled(cancel)?;
        if self.get_raw(&session.id)?.is_some() {
            return Err(CtnrError::new(
                ErrorCode::AlreadyExists,
                ErrorDomain::Store,
                format!("session {} already exists", session.id),
            ));
        }
        self.evict_for_capacity()?;
        self.put_raw(&session)
    }

    async fn get(&self, id: &SessionId, cancel: &CancellationToken) -> Result<Option<Session>> {
        check_cancelled(cancel)?;
        self.get_raw(id)
    }

    async fn update(&self, session: Session, cancel: &CancellationToken) -> Result<()> {
        check_cancelled(cancel)?;
        if self.get_raw(&session.id)?.is_none() {
            return Err(CtnrError::not_found(ErrorDomain::Store, format!("session {} not found", session.id)));
        }
        self.put_raw(&session)
    }

    async fn delete(&self, id: &SessionId, cancel: &CancellationToken) -> Result<bool> {
        check_cancelled(cancel)?;
        if self.get_raw(id)?.is_none() {
            return Err(CtnrError::not_found(ErrorDomain::Store, format!("session {id} not found")));
        }
        self.db.remove(id.0.as_bytes()).map_err(store_io_err)?;
        Ok(true)
    }

    async fn exists(&self, id: &SessionId, cancel: &CancellationToken) -> Result<bool> {
        check_cancelled(cancel)?;
        Ok(self.get_raw(id)?.is_some())
    }

    async fn list(&self, filters: &SessionFilters, cancel: &CancellationToken) -> Result<Vec<Session>> {
        check_cancelled(cancel)?;
        Ok(self.all_sessions()?.into_iter().filter(|s| filters.matches(s)).collect())
    }

    async fn update_atomic(
        &self,
        id: &SessionId,
        f: Box<dyn FnOnce(Option<Session>) -> Option<Session> + Send>,
        cancel: &CancellationToken,
    ) -> Result<Option<Session>> {
        check_cancelled(cancel)?;
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let current = self.get_raw(id)?;
        match f(current) {
            Some(mut next) => {
                next.touch();
                self.put_raw(&next)?;
                Ok(Some(next))
            }
            None => Ok(None),
        }
    }

    async fn compare_and_swap(&self, id: &SessionId, expected_version: i64, new: Session, cancel: &CancellationToken) -> Result<bool> {
        check_cancelled(cancel)?;
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let current_version = self.get_raw(id)?.map(|s| s.version());
        if current_version != Some(expected_version) {
            return Ok(false);
        }

        let mut next = new;
        next.touch();
        self.put_raw(&next)?;
        Ok(true)
    }

    async fn batch_update(
        &self,
        updates: BTreeMap<SessionId, Box<dyn FnOnce(Option<Session>) -> Option<Session> + Send>>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        check_cancelled(cancel)?;
        // BTreeMap already iterates in sorted key order, so locks below are
        // acquired in a fixed global order regardless of caller-supplied order.
        let mut guards = Vec::with_capacity(updates.len());
        for id in updates.keys() {
            guards.push(self.lock_for(id));
        }
        let mut held = Vec::with_capacity(guards.len());
        for lock in &guards {
            held.push(lock.lock().await);
        }

        let mut batch = sled::Batch::default();
        for (id, f) in updates {
            let current = self.get_raw(&id)?;
            if let Some(mut next) = f(current) {
                next.touch();
                let bytes = serde_json::to_vec(&next)?;
                batch.insert(next.id.0.as_bytes(), bytes);
            }
        }

        self.db.apply_batch(batch).map_err(store_io_err)?;
        Ok(())
    }

    async fn cleanup(&self, cancel: &CancellationToken) -> Result<usize> {
        check_cancelled(cancel)?;
        let now = chrono::Utc::now();
        let sessions = self.all_sessions()?;
        let mut batch = sled::Batch::default();
        let mut count = 0usize;

        for session in sessions {
            if session.is_expired(now) {
                batch.remove(session.id.0.as_bytes());
                count += 1;
            }
        }

        self.db.apply_batch(batch).map_err(store_io_err)?;
        Ok(count)
    }

    async fn stats(&self, cancel: &CancellationToken) -> Result<StoreStats> {
        check_cancelled(cancel)?;
        let sessions = self.all_sessions()?;
        let mut stats = StoreStats {
            total: sessions.len(),
            ..Default::default()
        };
        for session in &sessions {
            match session.status {
                SessionStatus::Active => stats.active += 1,
                SessionStatus::Suspended => stats.suspended += 1,
                SessionStatus::Expired => stats.expired += 1,
            }
        }
        Ok(stats)
    }
}
