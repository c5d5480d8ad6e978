use async_trait::async_trait;
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::pooled_connection::bb8::Pool;
use diesel_async::pooled_connection::{AsyncDieselConnectionManager, PoolableConnection};
use diesel_async::{
    AnsiTransactionManager, AsyncConnection, AsyncPgConnection, RunQueryDsl,
    SimpleAsyncConnection, TransactionManager,
};
use shared::{Booking, BookingFilter, Event, Page};
use std::collections::HashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{page_offset, InventoryStore, Isolation, SessionState, TransactionOptions, WriteConcern};
use crate::error::StoreError;
use crate::models::*;
use crate::schema::*;

type DbPool = Pool<AsyncPgConnection>;
type PooledConnection = bb8::PooledConnection<'static, AsyncDieselConnectionManager<AsyncPgConnection>>;

#[derive(Clone)]
pub struct PgInventoryStore {
    pool: DbPool,
}

/// A pooled connection with a transaction open on it.
///
/// The transaction is driven through diesel's transaction manager, so a
/// connection dropped mid-transaction or after a failed rollback reports
/// itself broken and the pool discards it.
pub struct PgSession {
    conn: PooledConnection,
    state: SessionState,
    read: HashMap<Uuid, Event>,
}

impl PgInventoryStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, pool_size: u32) -> Result<Self, StoreError> {
        let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(config)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self::new(pool))
    }

    async fn conn(&self) -> Result<PooledConnection, StoreError> {
        self.pool
            .get_owned()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    fn filtered(filter: &BookingFilter) -> bookings::BoxedQuery<'static, Pg> {
        let mut query = bookings::table
            .filter(bookings::status.eq(filter.status_or_default().as_str()))
            .into_boxed();
        if let Some(event_id) = filter.event_id {
            query = query.filter(bookings::event_id.eq(event_id));
        }
        if let Some(user_id) = filter.user_id.clone() {
            query = query.filter(bookings::user_id.eq(user_id));
        }
        query
    }
}

fn transaction_settings_sql(options: &TransactionOptions) -> String {
    let isolation = match options.isolation {
        // Postgres REPEATABLE READ is snapshot isolation: a concurrent
        // committed update to a row we then write fails with 40001.
        Isolation::Snapshot => "REPEATABLE READ",
    };
    let commit_level = match options.write_concern {
        WriteConcern::Majority => "remote_write",
    };
    format!(
        "SET TRANSACTION ISOLATION LEVEL {isolation}; SET LOCAL synchronous_commit TO {commit_level};"
    )
}

/// State after a commit or rollback attempt. A failed rollback leaves the
/// session open so `close` reports it again.
fn settled(outcome: &Result<(), StoreError>, committing: bool) -> SessionState {
    match (outcome, committing) {
        (Ok(()), true) => SessionState::Committed,
        (Ok(()), false) | (Err(_), true) => SessionState::Aborted,
        (Err(_), false) => SessionState::Open,
    }
}

async fn load_event(conn: &mut AsyncPgConnection, id: Uuid) -> Result<Option<Event>, StoreError> {
    let Some(row) = events::table
        .find(id)
        .first::<DbEvent>(conn)
        .await
        .optional()
        .map_err(map_db_error)?
    else {
        return Ok(None);
    };
    let sections = event_sections::table
        .filter(event_sections::event_id.eq(id))
        .order(event_sections::position.asc())
        .load::<DbSection>(conn)
        .await
        .map_err(map_db_error)?;

    row.into_event(sections)
        .map(Some)
        .map_err(|e| StoreError::Backend(e.to_string()))
}

fn map_db_error(err: DieselError) -> StoreError {
    match err {
        DieselError::DatabaseError(DatabaseErrorKind::SerializationFailure, info) => {
            StoreError::Conflict(info.message().to_string())
        }
        DieselError::DatabaseError(DatabaseErrorKind::ClosedConnection, info) => {
            StoreError::Unavailable(info.message().to_string())
        }
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
            StoreError::Backend(info.message().to_string())
        }
        other => StoreError::Backend(other.to_string()),
    }
}

fn ensure_open(session: &PgSession) -> Result<(), StoreError> {
    if session.state != SessionState::Open {
        return Err(StoreError::Backend(format!(
            "transaction is {:?}",
            session.state
        )));
    }
    Ok(())
}

#[async_trait]
impl InventoryStore for PgInventoryStore {
    type Session = PgSession;

    async fn begin_transaction(&self, options: TransactionOptions) -> Result<PgSession, StoreError> {
        let mut conn = self.conn().await?;
        AnsiTransactionManager::begin_transaction(&mut *conn)
            .await
            .map_err(map_db_error)?;
        if let Err(e) = conn.batch_execute(&transaction_settings_sql(&options)).await {
            if let Err(rollback) = AnsiTransactionManager::rollback_transaction(&mut *conn).await {
                warn!("Rollback after failed transaction setup failed: {}", rollback);
            }
            return Err(map_db_error(e));
        }
        Ok(PgSession {
            conn,
            state: SessionState::Open,
            read: HashMap::new(),
        })
    }

    async fn read_resource(&self, id: Uuid, session: &mut PgSession) -> Result<Option<Event>, StoreError> {
        ensure_open(session)?;
        let event = load_event(&mut session.conn, id).await?;
        if let Some(event) = &event {
            session.read.insert(id, event.clone());
        }
        Ok(event)
    }

    /// Writes back the sections that differ from what this session read.
    /// Each section is its own row, so writers on sibling sections of one
    /// event never touch the same row.
    async fn write_resource(&self, event: &Event, session: &mut PgSession) -> Result<(), StoreError> {
        ensure_open(session)?;
        let now = chrono::Utc::now();
        let before = session.read.get(&event.id).cloned();

        for section in &event.sections {
            let unchanged = before
                .as_ref()
                .and_then(|read| read.section(section.id))
                .is_some_and(|read| read == section);
            if unchanged {
                continue;
            }

            let updated = diesel::update(event_sections::table.find((event.id, section.id)))
                .set((
                    event_sections::remaining.eq(section.remaining),
                    event_sections::updated_at.eq(now),
                ))
                .execute(&mut *session.conn)
                .await
                .map_err(map_db_error)?;
            if updated == 0 {
                return Err(StoreError::Backend(format!(
                    "section not found: {} of event {}",
                    section.id, event.id
                )));
            }
        }
        session.read.insert(event.id, event.clone());
        Ok(())
    }

    async fn write_reservation(&self, booking: &Booking, session: &mut PgSession) -> Result<(), StoreError> {
        ensure_open(session)?;
        diesel::insert_into(bookings::table)
            .values(&DbBooking::from(booking))
            .execute(&mut *session.conn)
            .await
            .map_err(map_db_error)?;
        Ok(())
    }

    async fn commit(&self, session: &mut PgSession) -> Result<(), StoreError> {
        ensure_open(session)?;
        // On a failed COMMIT the manager rolls back, or marks the
        // connection broken if it cannot.
        let result = AnsiTransactionManager::commit_transaction(&mut *session.conn)
            .await
            .map_err(map_db_error);
        session.state = settled(&result, true);
        result
    }

    async fn abort(&self, session: &mut PgSession) -> Result<(), StoreError> {
        if session.state != SessionState::Open {
            return Ok(());
        }
        session.read.clear();
        let result = AnsiTransactionManager::rollback_transaction(&mut *session.conn)
            .await
            .map_err(map_db_error);
        session.state = settled(&result, false);
        result
    }

    async fn close(&self, mut session: PgSession) {
        if session.state == SessionState::Open {
            if let Err(e) = self.abort(&mut session).await {
                warn!(
                    "Rollback on close failed, connection broken: {} ({})",
                    e,
                    session.conn.is_broken()
                );
            }
        }
        debug!("transaction session closed ({:?})", session.state);
    }

    async fn publish_event(&self, event: &Event) -> Result<(), StoreError> {
        let row = DbEvent::from(event);
        let sections = DbSection::rows(event);
        let (row, sections) = (&row, &sections);
        let mut conn = self.conn().await?;

        conn.transaction::<_, DieselError, _>(|conn| {
            Box::pin(async move {
                diesel::insert_into(events::table)
                    .values(row)
                    .execute(conn)
                    .await?;
                diesel::insert_into(event_sections::table)
                    .values(sections)
                    .execute(conn)
                    .await?;
                Ok(())
            })
        })
        .await
        .map_err(map_db_error)
    }

    async fn find_event(&self, id: Uuid) -> Result<Option<Event>, StoreError> {
        let mut conn = self.conn().await?;
        load_event(&mut conn, id).await
    }

    async fn list_reservations(
        &self,
        filter: &BookingFilter,
        page: u32,
        page_size: u32,
    ) -> Result<Page<Booking>, StoreError> {
        let mut conn = self.conn().await?;

        let total: i64 = Self::filtered(filter)
            .count()
            .get_result(&mut *conn)
            .await
            .map_err(map_db_error)?;

        let offset = i64::try_from(page_offset(page, page_size)).unwrap_or(i64::MAX);
        let rows = Self::filtered(filter)
            .order(bookings::created_at.desc())
            .offset(offset)
            .limit(i64::from(page_size))
            .load::<DbBooking>(&mut *conn)
            .await
            .map_err(map_db_error)?;

        let items = rows
            .into_iter()
            .map(Booking::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(Page::new(items, page, page_size, u64::try_from(total).unwrap_or(0)))
    }
}
