//! Registration engine: the only component that changes who holds a seat.
//!
//! Every operation that touches an event's seats or waitlist runs under that
//! event's lock and within the configured deadline. Capacity itself is
//! guarded by the store's conditional writes, so the lock only has to keep
//! waitlist numbering consistent.

use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::models::{
    CreateEventRequest, CreateUserRequest, Event, EventPatch, EventStatus, Registration,
    RegistrationStatus, RegistrationView, User,
};
use crate::store::{
    AttendeeChange, ConditionFailure, EntityStore, InsertOutcome, PatchOutcome,
    RegistrationQuery, TransactOutcome, WriteOp,
};
use crate::utils::error::{AppError, AppResult};

pub mod decision;
pub mod locks;
pub mod waitlist;


use decision::{CancellationPlan, ConfirmAttempt};
use locks::EventLocks;

/// What a successful cancellation changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unregistration {
    pub removed: Registration,
    pub promoted: Option<Registration>,
}

pub struct RegistrationEngine {
    store: Arc<dyn EntityStore>,
    locks: EventLocks,
    timeout: Duration,
}

impl RegistrationEngine {
    pub fn new(store: Arc<dyn EntityStore>, timeout: Duration) -> Self {
        Self {
            store,
            locks: EventLocks::new(),
            timeout,
        }
    }

    async fn within_deadline<T, F>(&self, operation: &str, work: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>>,
    {
        match tokio::time::timeout(self.timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout(format!(
                "{} did not finish within {}ms",
                operation,
                self.timeout.as_millis()
            ))),
        }
    }

    // ----- events -------------------------------------------------------

    pub async fn create_event(&self, request: CreateEventRequest) -> AppResult<Event> {
        request.validate()?;
        let event = request.into_event(Utc::now());
        self.within_deadline("create_event", async {
            match self.store.insert_event(&event).await? {
                InsertOutcome::Inserted => {
                    info!(event_id = %event.id, capacity = event.capacity, "Event created");
                    Ok(event)
                }
                InsertOutcome::AlreadyExists => Err(AppError::EventExists(event.id.clone())),
            }
        })
        .await
    }

    pub async fn get_event(&self, event_id: &str) -> AppResult<Event> {
        self.within_deadline("get_event", self.load_event(event_id))
            .await
    }

    pub async fn list_events(&self, status: Option<EventStatus>) -> AppResult<Vec<Event>> {
        self.within_deadline("list_events", async {
            Ok(self.store.list_events(status).await?)
        })
        .await
    }

    /// Applies a partial update. Raising the capacity hands the new seats to
    /// the waitlist straight away.
    pub async fn update_event(&self, event_id: &str, patch: EventPatch) -> AppResult<Event> {
        patch.validate()?;
        self.within_deadline("update_event", async {
            let _guard = self.locks.acquire(event_id).await;
            let event = match self.store.update_event(event_id, &patch).await? {
                PatchOutcome::Updated(event) => event,
                PatchOutcome::NotFound => return Err(AppError::EventNotFound(event_id.to_string())),
                PatchOutcome::CapacityBelowAttendees { current_attendees } => {
                    return Err(AppError::CapacityBelowAttendees {
                        event_id: event_id.to_string(),
                        capacity: patch.capacity.unwrap_or_default(),
                        current_attendees,
                    })
                }
            };
            info!(event_id, "Event updated");

            if patch.capacity.is_none() || !event.has_open_seat() {
                return Ok(event);
            }
            let promoted = self.fill_open_seats(event_id).await?;
            if promoted.is_empty() {
                Ok(event)
            } else {
                self.load_event(event_id).await
            }
        })
        .await
    }

    pub async fn delete_event(&self, event_id: &str) -> AppResult<()> {
        self.within_deadline("delete_event", async {
            let _guard = self.locks.acquire(event_id).await;
            if self.store.delete_event(event_id).await? {
                info!(event_id, "Event deleted");
                Ok(())
            } else {
                Err(AppError::EventNotFound(event_id.to_string()))
            }
        })
        .await
    }

    // ----- users --------------------------------------------------------

    pub async fn create_user(&self, request: CreateUserRequest) -> AppResult<User> {
        request.validate()?;
        let user = request.into_user(Utc::now());
        self.within_deadline("create_user", async {
            match self.store.insert_user(&user).await? {
                InsertOutcome::Inserted => {
                    info!(user_id = %user.id, "User created");
                    Ok(user)
                }
                InsertOutcome::AlreadyExists => Err(AppError::UserExists(user.id.clone())),
            }
        })
        .await
    }

    pub async fn get_user(&self, user_id: &str) -> AppResult<User> {
        self.within_deadline("get_user", self.load_user(user_id))
            .await
    }

    // ----- registrations ------------------------------------------------

    pub async fn register(&self, event_id: &str, user_id: &str) -> AppResult<Registration> {
        self.within_deadline("register", async {
            let _guard = self.locks.acquire(event_id).await;
            self.register_locked(event_id, user_id).await
        })
        .await
    }

    async fn register_locked(&self, event_id: &str, user_id: &str) -> AppResult<Registration> {
        self.load_user(user_id).await?;
        let event = self.load_event(event_id).await?;
        decision::ensure_open(&event)?;

        let already_registered = self
            .store
            .query_registrations(&RegistrationQuery::by_user(user_id))
            .await?
            .iter()
            .any(|r| r.event_id == event_id);
        if already_registered {
            return Err(AppError::AlreadyRegistered {
                event_id: event_id.to_string(),
                user_id: user_id.to_string(),
            });
        }

        if event.has_open_seat() {
            match self.attempt_confirm(&event, user_id).await? {
                ConfirmAttempt::Confirmed(registration) => {
                    info!(
                        event_id,
                        user_id,
                        registration_id = %registration.id,
                        "Registration confirmed"
                    );
                    return Ok(registration);
                }
                ConfirmAttempt::CapacityConflict => {
                    debug!(event_id, user_id, "Last seat taken concurrently, trying waitlist");
                }
            }
        }

        self.join_waitlist(&event, user_id).await
    }

    async fn attempt_confirm(&self, event: &Event, user_id: &str) -> AppResult<ConfirmAttempt> {
        let registration = Registration::confirmed(&event.id, user_id, Utc::now());
        match self
            .store
            .transact_write(decision::confirm_ops(&registration))
            .await?
        {
            TransactOutcome::Committed => Ok(ConfirmAttempt::Confirmed(registration)),
            TransactOutcome::Rejected {
                reason: ConditionFailure::NoCapacity,
                ..
            } => Ok(ConfirmAttempt::CapacityConflict),
            TransactOutcome::Rejected { reason, .. } => {
                Err(decision::condition_error(reason, &event.id, user_id))
            }
        }
    }

    async fn join_waitlist(&self, event: &Event, user_id: &str) -> AppResult<Registration> {
        let mut waitlisted = self.waitlisted(&event.id).await?;
        // A queue left with gaps by an outside write is closed up by the
        // same transaction that appends to it.
        let repairs = waitlist::plan_renumber(&waitlisted);
        waitlist::apply_changes(&mut waitlisted, &repairs);

        let position = decision::waitlist_position(event, &waitlisted)?;
        let registration = Registration::waitlisted(&event.id, user_id, position, Utc::now());

        let mut ops = waitlist::renumber_ops(&repairs);
        ops.push(WriteOp::PutRegistration(registration.clone()));
        match self.store.transact_write(ops).await? {
            TransactOutcome::Committed => {
                if !repairs.is_empty() {
                    warn!(event_id = %event.id, repaired = repairs.len(), "Waitlist gaps closed");
                }
                info!(
                    event_id = %event.id,
                    user_id,
                    registration_id = %registration.id,
                    position,
                    "Registration waitlisted"
                );
                Ok(registration)
            }
            TransactOutcome::Rejected { reason, .. } => {
                Err(decision::condition_error(reason, &event.id, user_id))
            }
        }
    }

    pub async fn unregister(&self, event_id: &str, user_id: &str) -> AppResult<Unregistration> {
        self.within_deadline("unregister", async {
            let _guard = self.locks.acquire(event_id).await;
            self.unregister_locked(event_id, user_id).await
        })
        .await
    }

    async fn unregister_locked(&self, event_id: &str, user_id: &str) -> AppResult<Unregistration> {
        let not_registered = || AppError::NotRegistered {
            event_id: event_id.to_string(),
            user_id: user_id.to_string(),
        };

        let removed = self
            .store
            .query_registrations(&RegistrationQuery::by_user(user_id))
            .await?
            .into_iter()
            .find(|r| r.event_id == event_id)
            .ok_or_else(not_registered)?;

        let waitlisted = self.waitlisted(event_id).await?;
        let plan = CancellationPlan::new(removed, &waitlisted);

        let mut promoted = plan.promotion.clone();
        let mut outcome = self.store.transact_write(plan.ops()).await?;
        if let TransactOutcome::Rejected { op_index, reason } = outcome {
            if let Some(candidate) = promoted.take().filter(|_| plan.is_handover_step(op_index)) {
                warn!(
                    event_id,
                    registration_id = %candidate.id,
                    ?reason,
                    "Promotion rejected, releasing seat instead"
                );
                outcome = self.store.transact_write(plan.release_ops()).await?;
            }
        }
        match outcome {
            TransactOutcome::Committed => {}
            TransactOutcome::Rejected {
                op_index: 0,
                reason,
            } => return Err(decision::condition_error(reason, event_id, user_id)),
            TransactOutcome::Rejected { op_index, reason } => {
                return Err(AppError::InternalServerError(format!(
                    "Cancellation for event '{}' rejected at op {} ({:?})",
                    event_id, op_index, reason
                )))
            }
        }

        info!(
            event_id,
            user_id,
            registration_id = %plan.removed.id,
            status = %plan.removed.status,
            "Registration cancelled"
        );
        if let Some(registration) = &promoted {
            info!(
                event_id,
                user_id = %registration.user_id,
                registration_id = %registration.id,
                "Waitlisted registration promoted"
            );
        }

        Ok(Unregistration {
            removed: plan.removed,
            promoted,
        })
    }

    /// Promotes waitlisted registrations in queue order while the event has
    /// free seats. Each promotion re-checks capacity in the store and
    /// renumbers the rest of the queue in the same transaction. Callers hold
    /// the event lock.
    async fn fill_open_seats(&self, event_id: &str) -> AppResult<Vec<Registration>> {
        let mut promoted = Vec::new();
        let mut waitlisted = self.waitlisted(event_id).await?;

        while let Some(head) = waitlist::next_in_line(&waitlisted).cloned() {
            waitlisted.retain(|r| r.id != head.id);
            let changes = waitlist::plan_renumber(&waitlisted);

            let mut ops = vec![
                WriteOp::AdjustAttendees {
                    event_id: event_id.to_string(),
                    change: AttendeeChange::Reserve,
                },
                WriteOp::PromoteRegistration {
                    registration_id: head.id,
                },
            ];
            ops.extend(waitlist::renumber_ops(&changes));

            let outcome = self.store.transact_write(ops).await?;
            if !outcome.is_committed() {
                debug!(event_id, ?outcome, "No further seats to fill");
                break;
            }
            waitlist::apply_changes(&mut waitlisted, &changes);

            info!(
                event_id,
                user_id = %head.user_id,
                registration_id = %head.id,
                "Waitlisted registration promoted into new capacity"
            );
            let mut confirmed = head;
            confirmed.promote();
            promoted.push(confirmed);
        }

        Ok(promoted)
    }

    /// Recomputes waitlist positions for an event. Returns how many entries
    /// moved.
    pub async fn renumber_waitlist(&self, event_id: &str) -> AppResult<usize> {
        self.within_deadline("renumber_waitlist", async {
            let _guard = self.locks.acquire(event_id).await;
            waitlist::renumber(self.store.as_ref(), event_id).await
        })
        .await
    }

    // ----- listings -----------------------------------------------------

    pub async fn list_user_registrations(
        &self,
        user_id: &str,
        status: Option<RegistrationStatus>,
    ) -> AppResult<Vec<RegistrationView>> {
        self.within_deadline("list_user_registrations", async {
            self.load_user(user_id).await?;
            let mut registrations = self
                .store
                .query_registrations(&RegistrationQuery::by_user(user_id).with_status(status))
                .await?;
            waitlist::sort_for_user(&mut registrations);

            let mut views = Vec::with_capacity(registrations.len());
            for registration in registrations {
                let event_title = self
                    .store
                    .get_event(&registration.event_id)
                    .await?
                    .map(|event| event.title);
                views.push(RegistrationView {
                    registration,
                    event_title,
                    user_name: None,
                });
            }
            Ok(views)
        })
        .await
    }

    pub async fn list_event_registrations(
        &self,
        event_id: &str,
        status: Option<RegistrationStatus>,
    ) -> AppResult<Vec<RegistrationView>> {
        self.within_deadline("list_event_registrations", async {
            self.load_event(event_id).await?;
            let mut registrations = self
                .store
                .query_registrations(&RegistrationQuery::by_event(event_id).with_status(status))
                .await?;
            waitlist::sort_for_event(&mut registrations);

            let mut views = Vec::with_capacity(registrations.len());
            for registration in registrations {
                let user_name = self
                    .store
                    .get_user(&registration.user_id)
                    .await?
                    .map(|user| user.name);
                views.push(RegistrationView {
                    registration,
                    event_title: None,
                    user_name,
                });
            }
            Ok(views)
        })
        .await
    }

    // ----- helpers ------------------------------------------------------

    async fn load_event(&self, event_id: &str) -> AppResult<Event> {
        self.store
            .get_event(event_id)
            .await?
            .ok_or_else(|| AppError::EventNotFound(event_id.to_string()))
    }

    async fn load_user(&self, user_id: &str) -> AppResult<User> {
        self.store
            .get_user(user_id)
            .await?
            .ok_or_else(|| AppError::UserNotFound(user_id.to_string()))
    }

    async fn waitlisted(&self, event_id: &str) -> AppResult<Vec<Registration>> {
        Ok(self
            .store
            .query_registrations(
                &RegistrationQuery::by_event(event_id)
                    .with_status(Some(RegistrationStatus::Waitlisted)),
            )
            .await?)
    }
}
