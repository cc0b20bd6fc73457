//! Per-record persistence state machine.
//!
//! Every live record is wrapped in a [`Tracked`] cell carrying the
//! `current` snapshot, the `shadow` (last snapshot known to be on
//! disk), and the flag set `{new, dirty, tombstoned, gone}`. The save
//! protocol is expressed as a pure transition over the flag set so it
//! can be tested without a driver.

use tokio::sync::RwLock;

/// Flag set of a tracked record.
///
/// Invariant: at most one of `is_new` / `is_dirty` / `is_tombstoned`
/// determines the next save action (`plan_save` encodes the
/// precedence: gone > tombstoned > new > dirty); `is_gone` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PersistState {
    pub is_new: bool,
    pub is_dirty: bool,
    pub is_tombstoned: bool,
    pub is_gone: bool,
}

impl PersistState {
    pub fn new_record() -> Self {
        Self {
            is_new: true,
            ..Self::default()
        }
    }

    pub fn clean() -> Self {
        Self::default()
    }

    pub fn is_clean(&self) -> bool {
        !self.is_new && !self.is_dirty && !self.is_tombstoned && !self.is_gone
    }

    /// Live records are visible to lookups and listings.
    pub fn is_live(&self) -> bool {
        !self.is_tombstoned && !self.is_gone
    }
}

/// The driver call a save must issue for a given flag set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveAction {
    Nothing,
    Create,
    Update,
    Delete,
}

/// Decide the next driver call. Delete wins over create/update: a
/// record created and deleted before its first flush is removed with a
/// single idempotent delete and the driver never observes the create.
pub fn plan_save(state: PersistState) -> SaveAction {
    if state.is_gone {
        SaveAction::Nothing
    } else if state.is_tombstoned {
        SaveAction::Delete
    } else if state.is_new {
        SaveAction::Create
    } else if state.is_dirty {
        SaveAction::Update
    } else {
        SaveAction::Nothing
    }
}

/// Flag transition after a driver call succeeded. Driver failures do
/// not transition: the flags are left untouched and the entity stays
/// enqueued for retry.
pub fn apply_success(state: PersistState, action: SaveAction) -> PersistState {
    match action {
        SaveAction::Nothing => state,
        SaveAction::Create | SaveAction::Update => PersistState::clean(),
        SaveAction::Delete => PersistState {
            is_new: false,
            is_dirty: false,
            is_tombstoned: false,
            is_gone: true,
        },
    }
}

#[derive(Debug)]
struct TrackedInner<T> {
    current: T,
    shadow: Option<T>,
    state: PersistState,
}

/// A record plus its persistence bookkeeping, guarded by one
/// reader/writer lock. Readers see `current` concurrently; mutators
/// and the flush worker are exclusive. The lock is async so the flush
/// worker can hold it across the driver call, which is what guarantees
/// at-most-one-concurrent-save per entity.
#[derive(Debug)]
pub struct Tracked<T: Clone> {
    inner: RwLock<TrackedInner<T>>,
}

/// Whether a mutation moved the record from clean to needing a flush,
/// in which case the caller must enqueue it.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeedsEnqueue(pub bool);

impl<T: Clone> Tracked<T> {
    /// A record that exists only in memory so far.
    pub fn new_unsaved(value: T) -> Self {
        Self {
            inner: RwLock::new(TrackedInner {
                current: value,
                shadow: None,
                state: PersistState::new_record(),
            }),
        }
    }

    /// A record loaded from the driver at startup.
    pub fn loaded(value: T) -> Self {
        Self {
            inner: RwLock::new(TrackedInner {
                shadow: Some(value.clone()),
                current: value,
                state: PersistState::clean(),
            }),
        }
    }

    pub async fn snapshot(&self) -> T {
        self.inner.read().await.current.clone()
    }

    pub async fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.read().await.current)
    }

    pub async fn state(&self) -> PersistState {
        self.inner.read().await.state
    }

    pub async fn is_live(&self) -> bool {
        self.inner.read().await.state.is_live()
    }

    /// Apply a mutation and mark the record dirty. Mutations of
    /// tombstoned or gone records are ignored.
    pub async fn mutate(&self, f: impl FnOnce(&mut T)) -> NeedsEnqueue {
        let mut inner = self.inner.write().await;
        if !inner.state.is_live() {
            return NeedsEnqueue(false);
        }
        f(&mut inner.current);
        let was_clean = inner.state.is_clean();
        if !inner.state.is_new {
            inner.state.is_dirty = true;
        }
        NeedsEnqueue(was_clean)
    }

    /// Mutate a derived field without scheduling persistence (dollar
    /// price recomputation on rate refresh).
    pub async fn mutate_derived(&self, f: impl FnOnce(&mut T)) {
        let mut inner = self.inner.write().await;
        if inner.state.is_live() {
            f(&mut inner.current);
        }
    }

    /// Mark the record for deletion.
    pub async fn tombstone(&self) -> NeedsEnqueue {
        let mut inner = self.inner.write().await;
        if !inner.state.is_live() {
            return NeedsEnqueue(false);
        }
        let was_clean = inner.state.is_clean();
        inner.state.is_tombstoned = true;
        NeedsEnqueue(was_clean)
    }

    /// Lock exclusively for the duration of a save. The guard exposes
    /// the planned action and applies the transition on success.
    pub async fn lock_for_save(&self) -> SaveGuard<'_, T> {
        SaveGuard {
            inner: self.inner.write().await,
        }
    }
}

pub struct SaveGuard<'a, T> {
    inner: tokio::sync::RwLockWriteGuard<'a, TrackedInner<T>>,
}

impl<T: Clone> SaveGuard<'_, T> {
    pub fn action(&self) -> SaveAction {
        plan_save(self.inner.state)
    }

    pub fn current(&self) -> &T {
        &self.inner.current
    }

    pub fn shadow(&self) -> Option<&T> {
        self.inner.shadow.as_ref()
    }

    /// Record a successful driver call: advance the flags and, for
    /// creates/updates, promote `current` to the new shadow.
    pub fn commit(&mut self, action: SaveAction) {
        if matches!(action, SaveAction::Create | SaveAction::Update) {
            self.inner.shadow = Some(self.inner.current.clone());
        }
        self.inner.state = apply_success(self.inner.state, action);
    }
}
