use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{CtnrError, ErrorDomain, Result};
use crate::session::{Session, SessionFilters, SessionId, StoreStats};

/// Checked once at the entry of every [`SessionStore`] operation (§5: a
/// cancellation-capable context, not a mid-operation race — sled reads and
/// writes are synchronous and fast enough that racing them buys nothing but
/// complexity). Returns [`ctnr_core::error::ErrorCode::Cancelled`] if `cancel`
/// was already signalled before the op began.
pub fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(CtnrError::cancelled(ErrorDomain::Store, "store operation cancelled before it began"));
    }
    Ok(())
}

/// Atomic, concurrency-safe, persistent key→record map for [`Session`]s.
///
/// Implementations must serialize `UpdateAtomic`/`CompareAndSwap` against the
/// same [`SessionId`] while letting operations on distinct IDs proceed
/// independently, and must apply `BatchUpdate` all-or-nothing. Every method
/// takes a [`CancellationToken`] and must refuse to start (`ErrorCode::Cancelled`)
/// if it's already cancelled when the call begins (§4.1, §5).
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, session: Session, cancel: &CancellationToken) -> Result<()>;
    async fn get(&self, id: &SessionId, cancel: &CancellationToken) -> Result<Option<Session>>;
    async fn update(&self, session: Session, cancel: &CancellationToken) -> Result<()>;
    async fn delete(&self, id: &SessionId, cancel: &CancellationToken) -> Result<bool>;
    async fn exists(&self, id: &SessionId, cancel: &CancellationToken) -> Result<bool>;

    /// Returns every session matching an AND of `filters`' supplied predicates.
    async fn list(&self, filters: &SessionFilters, cancel: &CancellationToken) -> Result<Vec<Session>>;

    /// Read-modify-write under a per-ID lock. `f` receives the current
    /// session (or `None` if it doesn't exist) and returns the value to
    /// persist, or `None` to leave the store untouched.
    async fn update_atomic(
        &self,
        id: &SessionId,
        f: Box<dyn FnOnce(Option<Session>) -> Option<Session> + Send>,
        cancel: &CancellationToken,
    ) -> Result<Option<Session>>;

    /// Optimistic-concurrency update: succeeds only if the stored session's
    /// [`Session::version`] still equals `expected_version`.
    async fn compare_and_swap(
        &self,
        id: &SessionId,
        expected_version: i64,
        new: Session,
        cancel: &CancellationToken,
    ) -> Result<bool>;

    /// Apply a per-ID read-modify-write closure to every named session,
    /// all-or-nothing, with IDs locked in sorted order to avoid deadlocking
    /// against concurrent batches that share members. A closure receives the
    /// current session (or `None` if the ID doesn't exist) and returns the
    /// value to persist, or `None` to leave that ID untouched — so IDs with
    /// no matching record are silently skipped rather than created.
    async fn batch_update(
        &self,
        updates: BTreeMap<SessionId, Box<dyn FnOnce(Option<Session>) -> Option<Session> + Send>>,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Delete every session whose `expires_at` has passed; returns the count removed.
    async fn cleanup(&self, cancel: &CancellationToken) -> Result<usize>;

    async fn stats(&self, cancel: &CancellationToken) -> Result<StoreStats>;
}
