//! Entity storage for events, users and registrations.
//!
//! The engine only talks to [`EntityStore`]. Registration writes that touch
//! capacity go through [`EntityStore::transact_write`], which applies a list
//! of [`WriteOp`]s all-or-nothing and reports a failed condition as a
//! [`TransactOutcome::Rejected`] value rather than an error.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Event, EventPatch, EventStatus, Registration, RegistrationStatus, User};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Secondary lookup paths over registrations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationIndex {
    ByUser(String),
    ByEvent(String),
}

impl RegistrationIndex {
    pub fn key(&self) -> &str {
        match self {
            RegistrationIndex::ByUser(key) | RegistrationIndex::ByEvent(key) => key,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationQuery {
    pub index: RegistrationIndex,
    pub status: Option<RegistrationStatus>,
}

impl RegistrationQuery {
    pub fn by_user(user_id: &str) -> Self {
        Self {
            index: RegistrationIndex::ByUser(user_id.to_string()),
            status: None,
        }
    }

    pub fn by_event(event_id: &str) -> Self {
        Self {
            index: RegistrationIndex::ByEvent(event_id.to_string()),
            status: None,
        }
    }

    pub fn with_status(mut self, status: Option<RegistrationStatus>) -> Self {
        self.status = status;
        self
    }

    pub fn matches(&self, registration: &Registration) -> bool {
        let key_matches = match &self.index {
            RegistrationIndex::ByUser(user_id) => registration.user_id == *user_id,
            RegistrationIndex::ByEvent(event_id) => registration.event_id == *event_id,
        };
        key_matches && self.status.map_or(true, |status| registration.status == status)
    }
}

/// Conditional change to an event's `current_attendees`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendeeChange {
    /// +1, only while `current_attendees < capacity`.
    Reserve,
    /// -1, only while `current_attendees > 0`.
    Release,
    /// A released seat handed straight to a promoted registration: no net
    /// change, only while `0 < current_attendees <= capacity`.
    Transfer,
}

impl AttendeeChange {
    /// Checks the condition against the current event state.
    pub fn check(&self, current_attendees: u32, capacity: u32) -> Result<u32, ConditionFailure> {
        match self {
            AttendeeChange::Reserve if current_attendees < capacity => Ok(current_attendees + 1),
            AttendeeChange::Reserve => Err(ConditionFailure::NoCapacity),
            AttendeeChange::Release if current_attendees > 0 => Ok(current_attendees - 1),
            AttendeeChange::Transfer if current_attendees > 0 && current_attendees <= capacity => {
                Ok(current_attendees)
            }
            AttendeeChange::Transfer if current_attendees > capacity => {
                Err(ConditionFailure::NoCapacity)
            }
            AttendeeChange::Release | AttendeeChange::Transfer => {
                Err(ConditionFailure::NoAttendees)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Insert a registration; fails if the (user, event) pair is taken or the
    /// event is gone.
    PutRegistration(Registration),
    DeleteRegistration {
        registration_id: Uuid,
        expected: RegistrationStatus,
    },
    /// Waitlisted → confirmed, clearing the position.
    PromoteRegistration { registration_id: Uuid },
    SetWaitlistPosition { registration_id: Uuid, position: u32 },
    AdjustAttendees {
        event_id: String,
        change: AttendeeChange,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionFailure {
    EventMissing,
    NoCapacity,
    NoAttendees,
    DuplicateRegistration,
    RegistrationMissing,
    StatusMismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactOutcome {
    Committed,
    Rejected {
        op_index: usize,
        reason: ConditionFailure,
    },
}

impl TransactOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, TransactOutcome::Committed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyExists,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    Updated(Event),
    NotFound,
    CapacityBelowAttendees { current_attendees: u32 },
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn get_event(&self, event_id: &str) -> StoreResult<Option<Event>>;

    /// Stores a new event unless the id is already taken.
    async fn insert_event(&self, event: &Event) -> StoreResult<InsertOutcome>;

    /// Events ordered by creation time.
    async fn list_events(&self, status: Option<EventStatus>) -> StoreResult<Vec<Event>>;

    /// Applies a patch, refusing a capacity below the confirmed attendees.
    async fn update_event(&self, event_id: &str, patch: &EventPatch) -> StoreResult<PatchOutcome>;

    /// Deletes the event together with its registrations.
    async fn delete_event(&self, event_id: &str) -> StoreResult<bool>;

    async fn get_user(&self, user_id: &str) -> StoreResult<Option<User>>;

    async fn insert_user(&self, user: &User) -> StoreResult<InsertOutcome>;

    async fn get_registration(&self, registration_id: Uuid) -> StoreResult<Option<Registration>>;

    /// Index lookup. Results come back in no particular order.
    async fn query_registrations(&self, query: &RegistrationQuery)
        -> StoreResult<Vec<Registration>>;

    async fn transact_write(&self, ops: Vec<WriteOp>) -> StoreResult<TransactOutcome>;

    async fn update_attendees_if(
        &self,
        event_id: &str,
        change: AttendeeChange,
    ) -> StoreResult<TransactOutcome> {
        self.transact_write(vec![WriteOp::AdjustAttendees {
            event_id: event_id.to_string(),
            change,
        }])
        .await
    }
}
