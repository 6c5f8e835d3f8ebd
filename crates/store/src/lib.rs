use std::time::Duration;

use sqlx::Row;
use sqlx::postgres::{PgPoolOptions, PgRow};
use taxreg_contracts::{Customer, CustomerDraft};

/// Closed outcome taxonomy for store operations. Callers switch on the
/// variant; error text is never inspected.
#[derive(Debug)]
pub enum StoreError {
    /// The tax identifier is already registered to another record.
    DuplicateTaxId,
    /// The update target does not exist.
    NotFound,
    Timeout,
    Sqlx(sqlx::Error),
}

impl StoreError {
    /// Transient infrastructure faults; safe to retry from the client side.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Timeout | StoreError::Sqlx(_))
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::DuplicateTaxId => write!(f, "tax id already registered"),
            StoreError::NotFound => write!(f, "customer not found"),
            StoreError::Timeout => write!(f, "store operation timed out"),
            StoreError::Sqlx(err) => write!(f, "store sql error: {}", err),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(value: sqlx::Error) -> Self {
        StoreError::Sqlx(value)
    }
}

const CUSTOMER_COLUMNS: &str =
    "id, name, tax_id, branch_code, address, phone_number, created_at, updated_at";

/// Gateway to the `customers` table. Stateless apart from the shared pool;
/// cheap to clone into per-request handlers.
#[derive(Clone)]
pub struct CustomerStore {
    pool: sqlx::PgPool,
    statement_timeout: Duration,
}

impl CustomerStore {
    pub async fn connect(
        db_url: &str,
        max_connections: u32,
        statement_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = tokio::time::timeout(
            Duration::from_secs(2),
            PgPoolOptions::new()
                .max_connections(max_connections)
                .connect(db_url),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        Ok(Self {
            pool,
            statement_timeout,
        })
    }

    pub async fn connect_and_migrate(
        db_url: &str,
        max_connections: u32,
        statement_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let store = Self::connect(db_url, max_connections, statement_timeout).await?;
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        tokio::time::timeout(Duration::from_secs(10), migrate(&self.pool))
            .await
            .map_err(|_| StoreError::Timeout)??;
        Ok(())
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        tokio::time::timeout(
            self.statement_timeout,
            sqlx::query("SELECT 1").execute(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;
        Ok(())
    }

    /// Exact-match lookup by tax identifier or phone number. A miss is
    /// `Ok(None)`, not an error.
    pub async fn search(&self, term: &str) -> Result<Option<Customer>, StoreError> {
        let row = tokio::time::timeout(
            self.statement_timeout,
            sqlx::query(&format!(
                "SELECT {} FROM customers WHERE tax_id = $1 OR phone_number = $1 LIMIT 1",
                CUSTOMER_COLUMNS,
            ))
            .bind(term)
            .fetch_optional(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        row.as_ref()
            .map(customer_from_row)
            .transpose()
            .map_err(StoreError::Sqlx)
    }

    /// Primary-key lookup.
    pub async fn get(&self, id: i64) -> Result<Option<Customer>, StoreError> {
        let row = tokio::time::timeout(
            self.statement_timeout,
            sqlx::query(&format!(
                "SELECT {} FROM customers WHERE id = $1",
                CUSTOMER_COLUMNS,
            ))
            .bind(id)
            .fetch_optional(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        row.as_ref()
            .map(customer_from_row)
            .transpose()
            .map_err(StoreError::Sqlx)
    }

    /// Insert a new record and return it fully materialized (server-assigned
    /// id, store-owned timestamps). An empty branch code is persisted as the
    /// default and an empty phone number as NULL.
    pub async fn create(&self, draft: &CustomerDraft) -> Result<Customer, StoreError> {
        let row = tokio::time::timeout(
            self.statement_timeout,
            sqlx::query(&format!(
                "INSERT INTO customers (name, tax_id, branch_code, address, phone_number) \
                 VALUES ($1, $2, $3, $4, $5) RETURNING {}",
                CUSTOMER_COLUMNS,
            ))
            .bind(&draft.name)
            .bind(&draft.tax_id)
            .bind(draft.branch_code_or_default())
            .bind(&draft.address)
            .bind(draft.phone_number_opt())
            .fetch_one(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)?
        .map_err(classify_write_error)?;

        customer_from_row(&row).map_err(StoreError::Sqlx)
    }

    /// Rewrite all mutable fields of the record matching `draft.id` and
    /// refresh its last-modified timestamp. The caller guarantees
    /// `draft.id > 0`; a zero-row update is `NotFound`, a tax-id collision
    /// with a different record is `DuplicateTaxId`.
    pub async fn update(&self, draft: &CustomerDraft) -> Result<Customer, StoreError> {
        let row = tokio::time::timeout(
            self.statement_timeout,
            sqlx::query(&format!(
                "UPDATE customers SET name = $1, tax_id = $2, branch_code = $3, \
                 address = $4, phone_number = $5, updated_at = now() \
                 WHERE id = $6 RETURNING {}",
                CUSTOMER_COLUMNS,
            ))
            .bind(&draft.name)
            .bind(&draft.tax_id)
            .bind(draft.branch_code_or_default())
            .bind(&draft.address)
            .bind(draft.phone_number_opt())
            .bind(draft.id)
            .fetch_optional(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)?
        .map_err(classify_write_error)?;

        let row = row.ok_or(StoreError::NotFound)?;
        customer_from_row(&row).map_err(StoreError::Sqlx)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Duplicate detection relies entirely on the table's unique constraint:
/// under concurrent writes Postgres admits exactly one row per tax id and
/// rejects the rest with a unique violation.
fn classify_write_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err
        && db.is_unique_violation()
    {
        return StoreError::DuplicateTaxId;
    }
    StoreError::Sqlx(err)
}

fn customer_from_row(row: &PgRow) -> Result<Customer, sqlx::Error> {
    Ok(Customer {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        tax_id: row.try_get("tax_id")?,
        branch_code: row.try_get("branch_code")?,
        address: row.try_get("address")?,
        phone_number: row.try_get("phone_number")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub async fn migrate(pool: &sqlx::PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn migrate_url(db_url: &str) -> Result<(), sqlx::Error> {
    let pool = sqlx::PgPool::connect(db_url).await?;
    migrate(&pool).await?;
    pool.close().await;
    Ok(())
}
