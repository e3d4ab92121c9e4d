use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{Event, EventPatch, EventStatus, Registration, User};
use crate::store::{
    ConditionFailure, EntityStore, InsertOutcome, PatchOutcome, RegistrationIndex,
    RegistrationQuery, StoreResult, TransactOutcome, WriteOp,
};

/// Process-local store. Every mutation runs under one write lock, so a
/// transaction is atomic with respect to all readers.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    writes: AtomicU64,
}

#[derive(Default)]
struct Tables {
    events: HashMap<String, Event>,
    users: HashMap<String, User>,
    registrations: HashMap<Uuid, Registration>,
    by_user: HashMap<String, HashSet<Uuid>>,
    by_event: HashMap<String, HashSet<Uuid>>,
}

enum Undo {
    Remove(Uuid),
    Restore(Registration),
    Event(Event),
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of items written since creation. Rejected transactions write
    /// nothing.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn record_writes(&self, count: usize) {
        self.writes.fetch_add(count as u64, Ordering::SeqCst);
    }
}

impl Tables {
    fn index_ids(&self, index: &RegistrationIndex) -> Option<&HashSet<Uuid>> {
        match index {
            RegistrationIndex::ByUser(user_id) => self.by_user.get(user_id),
            RegistrationIndex::ByEvent(event_id) => self.by_event.get(event_id),
        }
    }

    fn pair_taken(&self, user_id: &str, event_id: &str) -> bool {
        self.by_user.get(user_id).map_or(false, |ids| {
            ids.iter().any(|id| {
                self.registrations
                    .get(id)
                    .map_or(false, |r| r.event_id == event_id)
            })
        })
    }

    fn insert_registration(&mut self, registration: Registration) {
        self.by_user
            .entry(registration.user_id.clone())
            .or_default()
            .insert(registration.id);
        self.by_event
            .entry(registration.event_id.clone())
            .or_default()
            .insert(registration.id);
        self.registrations.insert(registration.id, registration);
    }

    fn remove_registration(&mut self, registration_id: Uuid) -> Option<Registration> {
        let registration = self.registrations.remove(&registration_id)?;
        if let Some(ids) = self.by_user.get_mut(&registration.user_id) {
            ids.remove(&registration_id);
            if ids.is_empty() {
                self.by_user.remove(&registration.user_id);
            }
        }
        if let Some(ids) = self.by_event.get_mut(&registration.event_id) {
            ids.remove(&registration_id);
            if ids.is_empty() {
                self.by_event.remove(&registration.event_id);
            }
        }
        Some(registration)
    }

    fn waitlisted_mut(&mut self, registration_id: Uuid) -> Result<&mut Registration, ConditionFailure> {
        let registration = self
            .registrations
            .get_mut(&registration_id)
            .ok_or(ConditionFailure::RegistrationMissing)?;
        if !registration.is_waitlisted() {
            return Err(ConditionFailure::StatusMismatch);
        }
        Ok(registration)
    }

    fn apply(&mut self, op: &WriteOp) -> Result<Undo, ConditionFailure> {
        match op {
            WriteOp::PutRegistration(registration) => {
                if !self.events.contains_key(&registration.event_id) {
                    return Err(ConditionFailure::EventMissing);
                }
                if self.pair_taken(&registration.user_id, &registration.event_id) {
                    return Err(ConditionFailure::DuplicateRegistration);
                }
                self.insert_registration(registration.clone());
                Ok(Undo::Remove(registration.id))
            }
            WriteOp::DeleteRegistration {
                registration_id,
                expected,
            } => {
                let current = self
                    .registrations
                    .get(registration_id)
                    .ok_or(ConditionFailure::RegistrationMissing)?;
                if current.status != *expected {
                    return Err(ConditionFailure::StatusMismatch);
                }
                let removed = self
                    .remove_registration(*registration_id)
                    .ok_or(ConditionFailure::RegistrationMissing)?;
                Ok(Undo::Restore(removed))
            }
            WriteOp::PromoteRegistration { registration_id } => {
                let registration = self.waitlisted_mut(*registration_id)?;
                let previous = registration.clone();
                registration.promote();
                Ok(Undo::Restore(previous))
            }
            WriteOp::SetWaitlistPosition {
                registration_id,
                position,
            } => {
                let registration = self.waitlisted_mut(*registration_id)?;
                let previous = registration.clone();
                registration.waitlist_position = Some(*position);
                Ok(Undo::Restore(previous))
            }
            WriteOp::AdjustAttendees { event_id, change } => {
                let event = self
                    .events
                    .get_mut(event_id)
                    .ok_or(ConditionFailure::EventMissing)?;
                let next = change.check(event.current_attendees, event.capacity)?;
                let previous = event.clone();
                event.current_attendees = next;
                event.updated_at = Utc::now();
                Ok(Undo::Event(previous))
            }
        }
    }

    fn revert(&mut self, undo: Undo) {
        match undo {
            Undo::Remove(registration_id) => {
                self.remove_registration(registration_id);
            }
            Undo::Restore(registration) => self.insert_registration(registration),
            Undo::Event(event) => {
                self.events.insert(event.id.clone(), event);
            }
        }
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn get_event(&self, event_id: &str) -> StoreResult<Option<Event>> {
        Ok(self.tables.read().await.events.get(event_id).cloned())
    }

    async fn insert_event(&self, event: &Event) -> StoreResult<InsertOutcome> {
        let mut tables = self.tables.write().await;
        if tables.events.contains_key(&event.id) {
            return Ok(InsertOutcome::AlreadyExists);
        }
        tables.events.insert(event.id.clone(), event.clone());
        self.record_writes(1);
        Ok(InsertOutcome::Inserted)
    }

    async fn list_events(&self, status: Option<EventStatus>) -> StoreResult<Vec<Event>> {
        let tables = self.tables.read().await;
        let mut events: Vec<Event> = tables
            .events
            .values()
            .filter(|event| status.map_or(true, |s| event.status == s))
            .cloned()
            .collect();
        events.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(events)
    }

    async fn update_event(&self, event_id: &str, patch: &EventPatch) -> StoreResult<PatchOutcome> {
        let mut tables = self.tables.write().await;
        let Some(event) = tables.events.get_mut(event_id) else {
            return Ok(PatchOutcome::NotFound);
        };
        if let Some(capacity) = patch.capacity {
            if capacity < event.current_attendees {
                return Ok(PatchOutcome::CapacityBelowAttendees {
                    current_attendees: event.current_attendees,
                });
            }
        }
        event.apply(patch, Utc::now());
        let updated = event.clone();
        self.record_writes(1);
        Ok(PatchOutcome::Updated(updated))
    }

    async fn delete_event(&self, event_id: &str) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        if tables.events.remove(event_id).is_none() {
            return Ok(false);
        }
        let registration_ids: Vec<Uuid> = tables
            .by_event
            .get(event_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();
        for registration_id in &registration_ids {
            tables.remove_registration(*registration_id);
        }
        self.record_writes(1 + registration_ids.len());
        Ok(true)
    }

    async fn get_user(&self, user_id: &str) -> StoreResult<Option<User>> {
        Ok(self.tables.read().await.users.get(user_id).cloned())
    }

    async fn insert_user(&self, user: &User) -> StoreResult<InsertOutcome> {
        let mut tables = self.tables.write().await;
        if tables.users.contains_key(&user.id) {
            return Ok(InsertOutcome::AlreadyExists);
        }
        tables.users.insert(user.id.clone(), user.clone());
        self.record_writes(1);
        Ok(InsertOutcome::Inserted)
    }

    async fn get_registration(&self, registration_id: Uuid) -> StoreResult<Option<Registration>> {
        Ok(self
            .tables
            .read()
            .await
            .registrations
            .get(&registration_id)
            .cloned())
    }

    async fn query_registrations(
        &self,
        query: &RegistrationQuery,
    ) -> StoreResult<Vec<Registration>> {
        let tables = self.tables.read().await;
        let Some(ids) = tables.index_ids(&query.index) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| tables.registrations.get(id))
            .filter(|registration| query.matches(registration))
            .cloned()
            .collect())
    }

    async fn transact_write(&self, ops: Vec<WriteOp>) -> StoreResult<TransactOutcome> {
        let mut tables = self.tables.write().await;
        let mut undo_log = Vec::with_capacity(ops.len());

        for (op_index, op) in ops.iter().enumerate() {
            match tables.apply(op) {
                Ok(undo) => undo_log.push(undo),
                Err(reason) => {
                    while let Some(undo) = undo_log.pop() {
                        tables.revert(undo);
                    }
                    return Ok(TransactOutcome::Rejected { op_index, reason });
                }
            }
        }

        self.record_writes(ops.len());
        Ok(TransactOutcome::Committed)
    }
}

#[cfg(test)]
impl MemoryStore {
    /// Confirmed registrations currently stored for `event_id`.
    pub async fn confirmed_count(&self, event_id: &str) -> usize {
        let tables = self.tables.read().await;
        tables.by_event.get(event_id).map_or(0, |ids| {
            ids.iter()
                .filter_map(|id| tables.registrations.get(id))
                .filter(|r| r.is_confirmed())
                .count()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CreateEventRequest, RegistrationStatus};
    use crate::store::AttendeeChange;

    fn event(id: &str, capacity: u32) -> Event {
        CreateEventRequest {
            event_id: Some(id.to_string()),
            title: "Meetup".to_string(),
            description: "Monthly meetup".to_string(),
            date: "2026-12-01".to_string(),
            location: "Berlin".to_string(),
            organizer: "Rust Berlin".to_string(),
            capacity,
            status: EventStatus::Active,
            has_waitlist: true,
            waitlist_capacity: None,
        }
        .into_event(Utc::now())
    }

    #[tokio::test]
    async fn test_failed_condition_rolls_back_whole_transaction() {
        let store = MemoryStore::new();
        store.insert_event(&event("evt", 1)).await.unwrap();
        let writes_before = store.write_count();

        let first = Registration::confirmed("evt", "ada", Utc::now());
        let outcome = store
            .transact_write(vec![
                WriteOp::PutRegistration(first.clone()),
                WriteOp::AdjustAttendees {
                    event_id: "evt".to_string(),
                    change: AttendeeChange::Release,
                },
            ])
            .await
            .unwrap();

        assert_eq!(
            outcome,
            TransactOutcome::Rejected {
                op_index: 1,
                reason: ConditionFailure::NoAttendees
            }
        );
        assert!(store.get_registration(first.id).await.unwrap().is_none());
        assert!(store
            .query_registrations(&RegistrationQuery::by_user("ada"))
            .await
            .unwrap()
            .is_empty());
        assert_eq!(store.write_count(), writes_before);
    }

    #[tokio::test]
    async fn test_duplicate_pair_is_rejected() {
        let store = MemoryStore::new();
        store.insert_event(&event("evt", 5)).await.unwrap();

        let first = Registration::confirmed("evt", "ada", Utc::now());
        let second = Registration::waitlisted("evt", "ada", 1, Utc::now());
        assert!(store
            .transact_write(vec![WriteOp::PutRegistration(first)])
            .await
            .unwrap()
            .is_committed());

        let outcome = store
            .transact_write(vec![WriteOp::PutRegistration(second)])
            .await
            .unwrap();
        assert_eq!(
            outcome,
            TransactOutcome::Rejected {
                op_index: 0,
                reason: ConditionFailure::DuplicateRegistration
            }
        );
    }

    #[tokio::test]
    async fn test_update_attendees_if_stops_at_capacity() {
        let store = MemoryStore::new();
        store.insert_event(&event("evt", 1)).await.unwrap();

        let first = store
            .update_attendees_if("evt", AttendeeChange::Reserve)
            .await
            .unwrap();
        let second = store
            .update_attendees_if("evt", AttendeeChange::Reserve)
            .await
            .unwrap();

        assert!(first.is_committed());
        assert!(!second.is_committed());
        assert_eq!(store.get_event("evt").await.unwrap().unwrap().current_attendees, 1);
    }

    #[tokio::test]
    async fn test_index_queries_filter_by_status() {
        let store = MemoryStore::new();
        store.insert_event(&event("a", 5)).await.unwrap();
        store.insert_event(&event("b", 5)).await.unwrap();
        store
            .transact_write(vec![
                WriteOp::PutRegistration(Registration::confirmed("a", "ada", Utc::now())),
                WriteOp::PutRegistration(Registration::waitlisted("b", "ada", 1, Utc::now())),
                WriteOp::PutRegistration(Registration::confirmed("a", "grace", Utc::now())),
            ])
            .await
            .unwrap();

        let by_user = store
            .query_registrations(&RegistrationQuery::by_user("ada"))
            .await
            .unwrap();
        assert_eq!(by_user.len(), 2);

        let confirmed_for_a = store
            .query_registrations(
                &RegistrationQuery::by_event("a").with_status(Some(RegistrationStatus::Confirmed)),
            )
            .await
            .unwrap();
        assert_eq!(confirmed_for_a.len(), 2);

        let waitlisted_for_a = store
            .query_registrations(
                &RegistrationQuery::by_event("a").with_status(Some(RegistrationStatus::Waitlisted)),
            )
            .await
            .unwrap();
        assert!(waitlisted_for_a.is_empty());
    }

    #[tokio::test]
    async fn test_capacity_patch_below_attendees_is_refused() {
        let store = MemoryStore::new();
        store.insert_event(&event("evt", 3)).await.unwrap();
        store
            .update_attendees_if("evt", AttendeeChange::Reserve)
            .await
            .unwrap();
        store
            .update_attendees_if("evt", AttendeeChange::Reserve)
            .await
            .unwrap();

        let patch = EventPatch {
            capacity: Some(1),
            ..EventPatch::default()
        };
        assert_eq!(
            store.update_event("evt", &patch).await.unwrap(),
            PatchOutcome::CapacityBelowAttendees {
                current_attendees: 2
            }
        );
    }

    #[tokio::test]
    async fn test_delete_event_cascades_registrations() {
        let store = MemoryStore::new();
        store.insert_event(&event("evt", 5)).await.unwrap();
        let registration = Registration::confirmed("evt", "ada", Utc::now());
        store
            .transact_write(vec![WriteOp::PutRegistration(registration.clone())])
            .await
            .unwrap();

        assert!(store.delete_event("evt").await.unwrap());
        assert!(store.get_registration(registration.id).await.unwrap().is_none());
        assert!(store
            .query_registrations(&RegistrationQuery::by_user("ada"))
            .await
            .unwrap()
            .is_empty());
        assert!(!store.delete_event("evt").await.unwrap());
    }
}
