//! Context-keyed SQLite sessions and scoped units of work.
//!
//! # Responsibility
//! - Own at most one open connection per execution context.
//! - Hand out `UnitOfWork` guards that roll back unless committed.
//! - Release connections on `close` / `reset` for an explicit context id.
//!
//! # Invariants
//! - A session is `Dirty` exactly while its connection holds an open
//!   transaction.
//! - Dropping a `UnitOfWork` without `commit()` rolls back, including during
//!   panic unwinding.
//! - Contexts never share a connection.
//!
//! # State machine
//! `no handle -> (first use) -> Clean -> (begin) -> Dirty -> (commit | rollback)
//! -> Clean -> ... -> (close | reset) -> no handle`

use super::{open_db, DbError, DbResult};
use log::{debug, error, info};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Identifier of one logical execution context (request, job, test case).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(Uuid);

impl ContextId {
    /// Mints a fresh random context id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ContextId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Observable state of one session handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No pending changes.
    Clean,
    /// A unit of work is open and holds uncommitted changes.
    Dirty,
}

/// One connection bound to one execution context.
pub struct Session {
    context: ContextId,
    conn: Connection,
}

impl Session {
    fn open(db_path: &Path, context: ContextId) -> DbResult<Self> {
        let conn = open_db(db_path)?;
        info!("event=session_open module=session status=ok context={context}");
        Ok(Self { context, conn })
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    /// Read access for queries that run outside a unit of work.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn state(&self) -> SessionState {
        if self.conn.is_autocommit() {
            SessionState::Clean
        } else {
            SessionState::Dirty
        }
    }

    /// Persists pending changes. No-op on a clean session.
    pub fn commit(&mut self) -> DbResult<()> {
        if self.state() == SessionState::Dirty {
            self.conn.execute_batch("COMMIT;")?;
            debug!(
                "event=uow_commit module=session status=ok context={}",
                self.context
            );
        }
        Ok(())
    }

    /// Discards pending changes. No-op on a clean session.
    pub fn rollback(&mut self) -> DbResult<()> {
        if self.state() == SessionState::Dirty {
            self.conn.execute_batch("ROLLBACK;")?;
            debug!(
                "event=uow_rollback module=session status=ok context={}",
                self.context
            );
        }
        Ok(())
    }

    fn close(mut self) -> DbResult<()> {
        self.rollback()?;
        let context = self.context;
        self.conn.close().map_err(|(_, err)| DbError::from(err))?;
        info!("event=session_close module=session status=ok context={context}");
        Ok(())
    }
}

/// Scoped acquisition of a session's transaction.
///
/// Obtained through [`SessionManager::scope`]. Wraps an immediate
/// `rusqlite::Transaction` and rolls back on drop unless
/// [`UnitOfWork::commit`] succeeded.
pub struct UnitOfWork<'s> {
    context: ContextId,
    conn: &'s Connection,
    tx: Option<Transaction<'s>>,
}

impl<'s> UnitOfWork<'s> {
    // The session lock held by `scope` rules out nested transactions, so the
    // unchecked constructor is enough here.
    fn begin(session: &'s Session) -> DbResult<Self> {
        let tx = Transaction::new_unchecked(&session.conn, TransactionBehavior::Immediate)?;
        Ok(Self {
            context: session.context,
            conn: &session.conn,
            tx: Some(tx),
        })
    }

    pub fn connection(&self) -> &Connection {
        self.conn
    }

    /// Commits the unit of work. A second call is a no-op.
    ///
    /// On failure the transaction is rolled back when it is released.
    pub fn commit(&mut self) -> DbResult<()> {
        if let Some(tx) = self.tx.take() {
            tx.commit()?;
            debug!(
                "event=uow_commit module=session status=ok context={}",
                self.context
            );
        }
        Ok(())
    }
}

impl Drop for UnitOfWork<'_> {
    fn drop(&mut self) {
        let Some(tx) = self.tx.take() else {
            return;
        };
        match tx.rollback() {
            Ok(()) => debug!(
                "event=uow_rollback module=session status=ok context={}",
                self.context
            ),
            Err(err) => error!(
                "event=uow_rollback module=session status=error context={} error={}",
                self.context, err
            ),
        }
    }
}

type SessionHandle = Arc<Mutex<Session>>;

/// Owns one session per context id for a single database file.
///
/// Callers pass the context id explicitly on every call; there is no ambient
/// "current context".
pub struct SessionManager {
    db_path: PathBuf,
    sessions: Mutex<HashMap<ContextId, SessionHandle>>,
}

impl SessionManager {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Mints an id for a new execution context. No connection is opened yet.
    pub fn new_context(&self) -> ContextId {
        ContextId::new()
    }

    /// Runs a read against the context's session, opening it on first use.
    pub fn with_session<T, E>(
        &self,
        context: ContextId,
        f: impl FnOnce(&Session) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<DbError>,
    {
        let handle = self.handle(context)?;
        let session = lock_session(&handle);
        f(&session)
    }

    /// Runs `f` inside a unit of work bound to `context`.
    ///
    /// `f` must call [`UnitOfWork::commit`] to keep its changes; every other
    /// exit path (early return, `Err`, panic) rolls back.
    pub fn scope<T, E>(
        &self,
        context: ContextId,
        f: impl FnOnce(&mut UnitOfWork<'_>) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<DbError>,
    {
        let handle = self.handle(context)?;
        let session = lock_session(&handle);
        let mut unit = UnitOfWork::begin(&session)?;
        f(&mut unit)
    }

    /// Commits pending changes of the context's session, if it has one.
    pub fn commit(&self, context: ContextId) -> DbResult<()> {
        match self.existing(context) {
            Some(handle) => {
                let mut session = lock_session(&handle);
                session.commit()
            }
            None => Ok(()),
        }
    }

    /// Rolls back pending changes of the context's session, if it has one.
    pub fn rollback(&self, context: ContextId) -> DbResult<()> {
        match self.existing(context) {
            Some(handle) => {
                let mut session = lock_session(&handle);
                session.rollback()
            }
            None => Ok(()),
        }
    }

    /// Closes the context's session and returns a fresh context id.
    pub fn reset(&self, context: ContextId) -> DbResult<ContextId> {
        self.close(context)?;
        let fresh = self.new_context();
        debug!("event=session_reset module=session status=ok from={context} to={fresh}");
        Ok(fresh)
    }

    /// Rolls back and releases the context's connection.
    pub fn close(&self, context: ContextId) -> DbResult<()> {
        let removed = lock_sessions(&self.sessions).remove(&context);
        let Some(handle) = removed else {
            return Ok(());
        };

        match Arc::try_unwrap(handle) {
            Ok(mutex) => mutex
                .into_inner()
                .unwrap_or_else(PoisonError::into_inner)
                .close(),
            // Another caller still holds the handle; the connection closes
            // when its last clone drops.
            Err(shared) => {
                let mut session = lock_session(&shared);
                session.rollback()
            }
        }
    }

    /// Returns the session state, or `None` when the context has no handle.
    pub fn session_state(&self, context: ContextId) -> Option<SessionState> {
        self.existing(context).map(|handle| {
            let session = lock_session(&handle);
            session.state()
        })
    }

    /// Number of contexts currently holding an open session.
    pub fn active_sessions(&self) -> usize {
        lock_sessions(&self.sessions).len()
    }

    fn existing(&self, context: ContextId) -> Option<SessionHandle> {
        lock_sessions(&self.sessions).get(&context).cloned()
    }

    fn handle(&self, context: ContextId) -> DbResult<SessionHandle> {
        if let Some(handle) = self.existing(context) {
            return Ok(handle);
        }

        // Open outside the map lock so other contexts are not blocked on I/O.
        let session = Session::open(&self.db_path, context)?;
        let handle = lock_sessions(&self.sessions)
            .entry(context)
            .or_insert_with(|| Arc::new(Mutex::new(session)))
            .clone();
        Ok(handle)
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        let contexts: Vec<ContextId> = lock_sessions(&self.sessions).keys().copied().collect();
        for context in contexts {
            if let Err(err) = self.close(context) {
                error!(
                    "event=session_close module=session status=error context={context} error={err}"
                );
            }
        }
    }
}

// A panic inside `scope` has already rolled back through `UnitOfWork::drop`
// before the guard is released, so a poisoned session is still consistent.
fn lock_session(handle: &SessionHandle) -> MutexGuard<'_, Session> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}

fn lock_sessions(
    sessions: &Mutex<HashMap<ContextId, SessionHandle>>,
) -> MutexGuard<'_, HashMap<ContextId, SessionHandle>> {
    sessions.lock().unwrap_or_else(PoisonError::into_inner)
}
