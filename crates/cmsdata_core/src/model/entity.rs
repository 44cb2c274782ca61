//! Entity identity and change-tracking primitives.
//!
//! # Responsibility
//! - Define the contract every persisted entity fulfils for the engine.
//! - Provide snapshot-and-diff change tracking and shared entity handles.
//!
//! # Invariants
//! - Identity is absent until the first successful insert and never changes
//!   once assigned.
//! - A tracker is clean right after construction, hydration and `mark_clean`.

use std::cell::{BorrowError, BorrowMutError, Ref, RefCell, RefMut};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::rc::Rc;

/// Numeric surrogate key assigned by storage.
pub type EntityId = i64;

/// Rejected identity transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// Storage keys are strictly positive.
    NonPositive(EntityId),
    AlreadyAssigned {
        current: EntityId,
        attempted: EntityId,
    },
}

impl Display for IdentityError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NonPositive(id) => write!(f, "identity must be positive, got {id}"),
            Self::AlreadyAssigned { current, attempted } => write!(
                f,
                "identity already assigned ({current}); refusing to reassign to {attempted}"
            ),
        }
    }
}

impl Error for IdentityError {}

/// Entity invariant violation detected before staging a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Blank {
        property: &'static str,
    },
    InvalidFormat {
        property: &'static str,
        value: String,
    },
    Duplicate {
        property: &'static str,
        value: String,
    },
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Blank { property } => write!(f, "{property} must not be blank"),
            Self::InvalidFormat { property, value } => {
                write!(f, "{property} has invalid format: `{value}`")
            }
            Self::Duplicate { property, value } => {
                write!(f, "{property} contains duplicate value `{value}`")
            }
        }
    }
}

impl Error for ValidationError {}

/// Contract between domain entities and the repository engine.
pub trait Entity: Clone + Send + Sync + 'static {
    /// Stable type name used for stage keys, cache keys and diagnostics.
    const ENTITY_TYPE: &'static str;

    fn id(&self) -> Option<EntityId>;

    fn has_identity(&self) -> bool {
        self.id().is_some()
    }

    /// One-way transition from "new" to "persisted".
    fn assign_identity(&mut self, id: EntityId) -> Result<(), IdentityError>;

    /// Names of tracked properties that differ from the last clean snapshot.
    fn dirty_properties(&self) -> Vec<&'static str>;

    fn is_dirty(&self) -> bool {
        !self.dirty_properties().is_empty()
    }

    /// Accepts current state as the new clean snapshot.
    fn mark_clean(&mut self);

    fn validate(&self) -> Result<(), ValidationError>;
}

/// Current state plus the snapshot it is diffed against.
#[derive(Debug, Clone)]
pub struct ChangeTracker<S> {
    current: S,
    snapshot: S,
}

impl<S: Clone> ChangeTracker<S> {
    pub fn new(state: S) -> Self {
        Self {
            snapshot: state.clone(),
            current: state,
        }
    }

    pub fn current(&self) -> &S {
        &self.current
    }

    pub fn current_mut(&mut self) -> &mut S {
        &mut self.current
    }

    pub fn snapshot(&self) -> &S {
        &self.snapshot
    }

    pub fn mark_clean(&mut self) {
        self.snapshot = self.current.clone();
    }
}

/// Assigns `id` into an identity slot, enforcing the one-way transition.
pub fn assign_once(slot: &mut Option<EntityId>, id: EntityId) -> Result<(), IdentityError> {
    if id <= 0 {
        return Err(IdentityError::NonPositive(id));
    }
    match *slot {
        Some(current) => Err(IdentityError::AlreadyAssigned {
            current,
            attempted: id,
        }),
        None => {
            *slot = Some(id);
            Ok(())
        }
    }
}

/// Shared handle over one in-memory entity.
///
/// Cloning the handle shares the entity. A unit of work keeps a clone of every
/// staged handle so that flush can write the assigned identity back onto the
/// caller's instance. Handles are single-threaded, like the unit of work.
#[derive(Debug)]
pub struct EntityHandle<E> {
    inner: Rc<RefCell<E>>,
}

impl<E> Clone for EntityHandle<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<E: Entity> EntityHandle<E> {
    pub fn new(entity: E) -> Self {
        Self {
            inner: Rc::new(RefCell::new(entity)),
        }
    }

    /// Borrows the entity. Panics if it is mutably borrowed.
    pub fn read(&self) -> Ref<'_, E> {
        self.inner.borrow()
    }

    /// Mutably borrows the entity. Panics if it is already borrowed.
    pub fn write(&self) -> RefMut<'_, E> {
        self.inner.borrow_mut()
    }

    pub(crate) fn try_read(&self) -> Result<Ref<'_, E>, BorrowError> {
        self.inner.try_borrow()
    }

    pub(crate) fn try_write(&self) -> Result<RefMut<'_, E>, BorrowMutError> {
        self.inner.try_borrow_mut()
    }

    /// Returns a detached copy of the current entity state.
    pub fn snapshot(&self) -> E {
        self.inner.borrow().clone()
    }

    pub fn id(&self) -> Option<EntityId> {
        self.inner.borrow().id()
    }

    pub fn has_identity(&self) -> bool {
        self.inner.borrow().has_identity()
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.borrow().is_dirty()
    }

    /// True when both handles point at the same entity instance.
    pub fn same_entity(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Provisional stage token, stable while any clone of the handle lives.
    pub(crate) fn token(&self) -> usize {
        Rc::as_ptr(&self.inner) as *const () as usize
    }
}

impl<E: Entity> From<E> for EntityHandle<E> {
    fn from(entity: E) -> Self {
        Self::new(entity)
    }
}
