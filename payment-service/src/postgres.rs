use async_trait::async_trait;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use shared::{NewPayment, PaymentFilter, PaymentRecord, PaymentStore, StoreError};

use crate::models::*;
use crate::schema::payments;

pub type DbPool = Pool<AsyncPgConnection>;

pub async fn connect(database_url: &str, max_connections: u32) -> Result<DbPool, StoreError> {
    let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
    Pool::builder()
        .max_size(max_connections)
        .build(config)
        .await
        .map_err(backend)
}

fn backend(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

pub struct PgPaymentStore {
    pool: DbPool,
}

impl PgPaymentStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> Result<PooledConnection<'_, AsyncPgConnection>, StoreError> {
        self.pool.get().await.map_err(|e: bb8::RunError<_>| backend(e))
    }
}

#[async_trait]
impl PaymentStore for PgPaymentStore {
    async fn insert(&self, payment: NewPayment) -> Result<PaymentRecord, StoreError> {
        let mut conn = self.conn().await?;
        let row = NewPaymentRow::from(&payment);

        let inserted = diesel::insert_into(payments::table)
            .values(&row)
            .get_result::<PaymentRow>(&mut conn)
            .await
            .map_err(|e| match e {
                DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                    StoreError::DuplicateTransaction(payment.transaction_id.clone())
                }
                other => backend(other),
            })?;

        inserted.try_into()
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<PaymentRecord>, StoreError> {
        let mut conn = self.conn().await?;
        payments::table
            .find(id)
            .first::<PaymentRow>(&mut conn)
            .await
            .optional()
            .map_err(backend)?
            .map(PaymentRecord::try_from)
            .transpose()
    }

    async fn get_by_transaction_id(&self, transaction_id: &str) -> Result<Option<PaymentRecord>, StoreError> {
        let mut conn = self.conn().await?;
        payments::table
            .filter(payments::transaction_id.eq(transaction_id))
            .first::<PaymentRow>(&mut conn)
            .await
            .optional()
            .map_err(backend)?
            .map(PaymentRecord::try_from)
            .transpose()
    }

    async fn update(&self, record: &PaymentRecord) -> Result<PaymentRecord, StoreError> {
        let mut conn = self.conn().await?;

        let updated = diesel::update(
            payments::table
                .filter(payments::id.eq(record.id))
                .filter(payments::version.eq(record.version())),
        )
        .set((
            payments::status.eq(record.status().as_str()),
            payments::updated_at.eq(record.updated_at),
            payments::version.eq(record.version() + 1),
        ))
        .get_result::<PaymentRow>(&mut conn)
        .await
        .optional()
        .map_err(backend)?;
        drop(conn);

        match updated {
            Some(row) => row.try_into(),
            None if self.exists_by_id(record.id).await? => Err(StoreError::Conflict(record.transaction_id.clone())),
            None => Err(StoreError::NotFound(record.id.to_string())),
        }
    }

    async fn list(&self, filter: &PaymentFilter) -> Result<Vec<PaymentRecord>, StoreError> {
        let mut conn = self.conn().await?;

        let mut query = payments::table.order(payments::id.asc()).into_boxed();
        query = match filter {
            PaymentFilter::All => query,
            PaymentFilter::Sender(account) => query.filter(payments::sender_account.eq(account.clone())),
            PaymentFilter::Receiver(account) => query.filter(payments::receiver_account.eq(account.clone())),
            PaymentFilter::Status(status) => query.filter(payments::status.eq(status.as_str())),
        };

        query
            .load::<PaymentRow>(&mut conn)
            .await
            .map_err(backend)?
            .into_iter()
            .map(PaymentRecord::try_from)
            .collect()
    }

    async fn exists_by_id(&self, id: i64) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        diesel::select(diesel::dsl::exists(payments::table.find(id)))
            .get_result::<bool>(&mut conn)
            .await
            .map_err(backend)
    }

    async fn delete_by_id(&self, id: i64) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let deleted = diesel::delete(payments::table.find(id))
            .execute(&mut conn)
            .await
            .map_err(backend)?;

        if deleted == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }
}
