use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, PgConnection};
use std::time::Duration;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::models::{Event, EventPatch, EventStatus, Registration, RegistrationStatus, User};
use crate::store::{
    AttendeeChange, ConditionFailure, EntityStore, InsertOutcome, PatchOutcome, RegistrationIndex,
    RegistrationQuery, StoreError, StoreResult, TransactOutcome, WriteOp,
};

const EVENT_COLUMNS: &str = "id, title, description, date, location, organizer, capacity, \
     current_attendees, status, has_waitlist, waitlist_capacity, created_at, updated_at";

const REGISTRATION_COLUMNS: &str =
    "id, user_id, event_id, status, registered_at, waitlist_position";

#[derive(Debug, FromRow)]
struct EventRow {
    id: String,
    title: String,
    description: String,
    date: String,
    location: String,
    organizer: String,
    capacity: i32,
    current_attendees: i32,
    status: String,
    has_waitlist: bool,
    waitlist_capacity: Option<i32>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for Event {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(Event {
            status: row
                .status
                .parse::<EventStatus>()
                .map_err(|_| StoreError::Corrupt(format!("event status '{}'", row.status)))?,
            capacity: to_u32("capacity", row.capacity)?,
            current_attendees: to_u32("current_attendees", row.current_attendees)?,
            waitlist_capacity: row
                .waitlist_capacity
                .map(|value| to_u32("waitlist_capacity", value))
                .transpose()?,
            id: row.id,
            title: row.title,
            description: row.description,
            date: row.date,
            location: row.location,
            organizer: row.organizer,
            has_waitlist: row.has_waitlist,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: String,
    name: String,
    email: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            name: row.name,
            email: row.email,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct RegistrationRow {
    id: Uuid,
    user_id: String,
    event_id: String,
    status: String,
    registered_at: DateTime<Utc>,
    waitlist_position: Option<i32>,
}

impl TryFrom<RegistrationRow> for Registration {
    type Error = StoreError;

    fn try_from(row: RegistrationRow) -> Result<Self, Self::Error> {
        Ok(Registration {
            status: row.status.parse::<RegistrationStatus>().map_err(|_| {
                StoreError::Corrupt(format!("registration status '{}'", row.status))
            })?,
            waitlist_position: row
                .waitlist_position
                .map(|value| to_u32("waitlist_position", value))
                .transpose()?,
            id: row.id,
            user_id: row.user_id,
            event_id: row.event_id,
            registered_at: row.registered_at,
        })
    }
}

fn to_u32(field: &str, value: i32) -> StoreResult<u32> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("{} = {}", field, value)))
}

fn to_i32(field: &str, value: u32) -> StoreResult<i32> {
    i32::try_from(value).map_err(|_| StoreError::Corrupt(format!("{} = {} out of range", field, value)))
}

/// PostgreSQL-backed store. Conditional updates are single guarded
/// `UPDATE` statements; `transact_write` runs in one transaction.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_millis(config.acquire_timeout_ms))
            .connect(&config.url)
            .await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!().run(&self.pool).await?;
        Ok(())
    }

    async fn apply(
        conn: &mut PgConnection,
        op: &WriteOp,
    ) -> StoreResult<Result<(), ConditionFailure>> {
        match op {
            WriteOp::PutRegistration(registration) => {
                let position = registration
                    .waitlist_position
                    .map(|p| to_i32("waitlist_position", p))
                    .transpose()?;
                let result = sqlx::query(
                    r#"
                    INSERT INTO registrations
                    (id, user_id, event_id, status, registered_at, waitlist_position)
                    SELECT $1::UUID, $2::TEXT, $3::TEXT, $4::TEXT, $5::TIMESTAMPTZ, $6::INTEGER
                    WHERE EXISTS (SELECT 1 FROM events WHERE id = $3)
                    ON CONFLICT (user_id, event_id) DO NOTHING
                    "#,
                )
                .bind(registration.id)
                .bind(&registration.user_id)
                .bind(&registration.event_id)
                .bind(registration.status.as_str())
                .bind(registration.registered_at)
                .bind(position)
                .execute(&mut *conn)
                .await?;

                if result.rows_affected() == 1 {
                    return Ok(Ok(()));
                }
                let event_exists: bool =
                    sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM events WHERE id = $1)")
                        .bind(&registration.event_id)
                        .fetch_one(&mut *conn)
                        .await?;
                Ok(Err(if event_exists {
                    ConditionFailure::DuplicateRegistration
                } else {
                    ConditionFailure::EventMissing
                }))
            }
            WriteOp::DeleteRegistration {
                registration_id,
                expected,
            } => {
                let result = sqlx::query("DELETE FROM registrations WHERE id = $1 AND status = $2")
                    .bind(registration_id)
                    .bind(expected.as_str())
                    .execute(&mut *conn)
                    .await?;
                if result.rows_affected() == 1 {
                    return Ok(Ok(()));
                }
                Self::registration_failure(conn, *registration_id).await
            }
            WriteOp::PromoteRegistration { registration_id } => {
                let result = sqlx::query(
                    r#"
                    UPDATE registrations
                    SET status = 'confirmed', waitlist_position = NULL
                    WHERE id = $1 AND status = 'waitlisted'
                    "#,
                )
                .bind(registration_id)
                .execute(&mut *conn)
                .await?;
                if result.rows_affected() == 1 {
                    return Ok(Ok(()));
                }
                Self::registration_failure(conn, *registration_id).await
            }
            WriteOp::SetWaitlistPosition {
                registration_id,
                position,
            } => {
                let result = sqlx::query(
                    r#"
                    UPDATE registrations
                    SET waitlist_position = $2
                    WHERE id = $1 AND status = 'waitlisted'
                    "#,
                )
                .bind(registration_id)
                .bind(to_i32("waitlist_position", *position)?)
                .execute(&mut *conn)
                .await?;
                if result.rows_affected() == 1 {
                    return Ok(Ok(()));
                }
                Self::registration_failure(conn, *registration_id).await
            }
            WriteOp::AdjustAttendees { event_id, change } => {
                let sql = match change {
                    AttendeeChange::Reserve => {
                        r#"
                        UPDATE events
                        SET current_attendees = current_attendees + 1, updated_at = NOW()
                        WHERE id = $1 AND current_attendees < capacity
                        "#
                    }
                    AttendeeChange::Release => {
                        r#"
                        UPDATE events
                        SET current_attendees = current_attendees - 1, updated_at = NOW()
                        WHERE id = $1 AND current_attendees > 0
                        "#
                    }
                    AttendeeChange::Transfer => {
                        r#"
                        UPDATE events
                        SET updated_at = NOW()
                        WHERE id = $1 AND current_attendees > 0 AND current_attendees <= capacity
                        "#
                    }
                };
                let result = sqlx::query(sql).bind(event_id).execute(&mut *conn).await?;
                if result.rows_affected() == 1 {
                    return Ok(Ok(()));
                }

                let counts: Option<(i32, i32)> =
                    sqlx::query_as("SELECT current_attendees, capacity FROM events WHERE id = $1")
                        .bind(event_id)
                        .fetch_optional(&mut *conn)
                        .await?;
                let reason = match counts {
                    None => ConditionFailure::EventMissing,
                    Some((current, capacity)) => change
                        .check(to_u32("current_attendees", current)?, to_u32("capacity", capacity)?)
                        .err()
                        .unwrap_or(ConditionFailure::NoCapacity),
                };
                Ok(Err(reason))
            }
        }
    }

    async fn registration_failure(
        conn: &mut PgConnection,
        registration_id: Uuid,
    ) -> StoreResult<Result<(), ConditionFailure>> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM registrations WHERE id = $1)")
                .bind(registration_id)
                .fetch_one(&mut *conn)
                .await?;
        Ok(Err(if exists {
            ConditionFailure::StatusMismatch
        } else {
            ConditionFailure::RegistrationMissing
        }))
    }
}

#[async_trait]
impl EntityStore for PgStore {
    async fn get_event(&self, event_id: &str) -> StoreResult<Option<Event>> {
        let sql = format!("SELECT {} FROM events WHERE id = $1", EVENT_COLUMNS);
        sqlx::query_as::<_, EventRow>(&sql)
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Event::try_from)
            .transpose()
    }

    async fn insert_event(&self, event: &Event) -> StoreResult<InsertOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO events
            (id, title, description, date, location, organizer, capacity,
            current_attendees, status, has_waitlist, waitlist_capacity, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&event.id)
        .bind(&event.title)
        .bind(&event.description)
        .bind(&event.date)
        .bind(&event.location)
        .bind(&event.organizer)
        .bind(to_i32("capacity", event.capacity)?)
        .bind(to_i32("current_attendees", event.current_attendees)?)
        .bind(event.status.as_str())
        .bind(event.has_waitlist)
        .bind(
            event
                .waitlist_capacity
                .map(|value| to_i32("waitlist_capacity", value))
                .transpose()?,
        )
        .bind(event.created_at)
        .bind(event.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(if result.rows_affected() == 1 {
            InsertOutcome::Inserted
        } else {
            InsertOutcome::AlreadyExists
        })
    }

    async fn list_events(&self, status: Option<EventStatus>) -> StoreResult<Vec<Event>> {
        let sql = format!(
            "SELECT {} FROM events WHERE ($1::TEXT IS NULL OR status = $1) ORDER BY created_at, id",
            EVENT_COLUMNS
        );
        sqlx::query_as::<_, EventRow>(&sql)
            .bind(status.map(|s| s.as_str()))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Event::try_from)
            .collect()
    }

    async fn update_event(&self, event_id: &str, patch: &EventPatch) -> StoreResult<PatchOutcome> {
        let sql = format!(
            r#"
            UPDATE events SET
                title = COALESCE($2, title),
                description = COALESCE($3, description),
                date = COALESCE($4, date),
                location = COALESCE($5, location),
                organizer = COALESCE($6, organizer),
                capacity = COALESCE($7, capacity),
                status = COALESCE($8, status),
                has_waitlist = COALESCE($9, has_waitlist),
                waitlist_capacity = COALESCE($10, waitlist_capacity),
                updated_at = NOW()
            WHERE id = $1 AND ($7::INTEGER IS NULL OR $7 >= current_attendees)
            RETURNING {}
            "#,
            EVENT_COLUMNS
        );
        let updated = sqlx::query_as::<_, EventRow>(&sql)
            .bind(event_id)
            .bind(patch.title.as_deref())
            .bind(patch.description.as_deref())
            .bind(patch.date.as_deref())
            .bind(patch.location.as_deref())
            .bind(patch.organizer.as_deref())
            .bind(patch.capacity.map(|c| to_i32("capacity", c)).transpose()?)
            .bind(patch.status.map(|s| s.as_str()))
            .bind(patch.has_waitlist)
            .bind(
                patch
                    .waitlist_capacity
                    .map(|c| to_i32("waitlist_capacity", c))
                    .transpose()?,
            )
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = updated {
            return Ok(PatchOutcome::Updated(Event::try_from(row)?));
        }

        let current: Option<i32> =
            sqlx::query_scalar("SELECT current_attendees FROM events WHERE id = $1")
                .bind(event_id)
                .fetch_optional(&self.pool)
                .await?;
        match current {
            None => Ok(PatchOutcome::NotFound),
            Some(current) => Ok(PatchOutcome::CapacityBelowAttendees {
                current_attendees: to_u32("current_attendees", current)?,
            }),
        }
    }

    async fn delete_event(&self, event_id: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM events WHERE id = $1")
            .bind(event_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_user(&self, user_id: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, name, email, created_at FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    async fn insert_user(&self, user: &User) -> StoreResult<InsertOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (id, name, email, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&user.id)
        .bind(&user.name)
        .bind(user.email.as_deref())
        .bind(user.created_at)
        .execute(&self.pool)
        .await?;

        Ok(if result.rows_affected() == 1 {
            InsertOutcome::Inserted
        } else {
            InsertOutcome::AlreadyExists
        })
    }

    async fn get_registration(&self, registration_id: Uuid) -> StoreResult<Option<Registration>> {
        let sql = format!(
            "SELECT {} FROM registrations WHERE id = $1",
            REGISTRATION_COLUMNS
        );
        sqlx::query_as::<_, RegistrationRow>(&sql)
            .bind(registration_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Registration::try_from)
            .transpose()
    }

    async fn query_registrations(
        &self,
        query: &RegistrationQuery,
    ) -> StoreResult<Vec<Registration>> {
        let column = match query.index {
            RegistrationIndex::ByUser(_) => "user_id",
            RegistrationIndex::ByEvent(_) => "event_id",
        };
        let sql = format!(
            "SELECT {} FROM registrations WHERE {} = $1 AND ($2::TEXT IS NULL OR status = $2)",
            REGISTRATION_COLUMNS, column
        );
        sqlx::query_as::<_, RegistrationRow>(&sql)
            .bind(query.index.key())
            .bind(query.status.map(|s| s.as_str()))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Registration::try_from)
            .collect()
    }

    async fn transact_write(&self, ops: Vec<WriteOp>) -> StoreResult<TransactOutcome> {
        let mut tx = self.pool.begin().await?;

        for (op_index, op) in ops.iter().enumerate() {
            if let Err(reason) = Self::apply(&mut *tx, op).await? {
                tx.rollback().await?;
                return Ok(TransactOutcome::Rejected { op_index, reason });
            }
        }

        tx.commit().await?;
        Ok(TransactOutcome::Committed)
    }
}
