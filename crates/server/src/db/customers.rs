//! Customer repository: loyalty and store-credit state.

use chrono::{DateTime, Utc};
use duka_core::types::{CustomerId, LoyaltyTier, Money, PhoneNumber};
use sqlx::{SqliteConnection, SqlitePool};

use super::RepositoryError;
use crate::models::customer::Customer;

// ===== Internal Row Types =====

#[derive(Debug, sqlx::FromRow)]
struct CustomerRow {
    id: i64,
    name: String,
    phone: Option<String>,
    email: Option<String>,
    credit_limit: Money,
    credit_balance: Money,
    total_orders: i64,
    total_spent: Money,
    loyalty_points: i64,
    loyalty_tier: LoyaltyTier,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CustomerRow> for Customer {
    type Error = RepositoryError;

    fn try_from(row: CustomerRow) -> Result<Self, Self::Error> {
        let phone = row
            .phone
            .map(|raw| {
                PhoneNumber::parse(&raw).map_err(|e| {
                    RepositoryError::DataCorruption(format!(
                        "invalid phone number for customer {}: {e}",
                        row.id
                    ))
                })
            })
            .transpose()?;

        Ok(Self {
            id: CustomerId::new(row.id),
            name: row.name,
            phone,
            email: row.email,
            credit_limit: row.credit_limit,
            credit_balance: row.credit_balance,
            total_orders: row.total_orders,
            total_spent: row.total_spent,
            loyalty_points: row.loyalty_points,
            loyalty_tier: row.loyalty_tier,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

// ===== Repository =====

/// Repository for customer records.
pub struct CustomerRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> CustomerRepository<'a> {
    /// Create a new repository backed by the given pool.
    #[must_use]
    pub const fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new customer.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Conflict` if the phone number is already
    /// registered, `RepositoryError::Database` on other query failures.
    pub async fn create(
        &self,
        name: &str,
        phone: Option<&PhoneNumber>,
        email: Option<&str>,
        credit_limit: Money,
        now: DateTime<Utc>,
    ) -> Result<Customer, RepositoryError> {
        let row = sqlx::query_as::<_, CustomerRow>(
            r"
            INSERT INTO customers (name, phone, email, credit_limit, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            RETURNING id, name, phone, email, credit_limit, credit_balance,
                      total_orders, total_spent, loyalty_points, loyalty_tier,
                      created_at, updated_at
            ",
        )
        .bind(name)
        .bind(phone.map(PhoneNumber::as_str))
        .bind(email)
        .bind(credit_limit)
        .bind(now)
        .fetch_one(self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return RepositoryError::Conflict("phone number is already registered".to_owned());
            }
            e.into()
        })?;

        Customer::try_from(row)
    }

    /// Fetch a customer by id.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` on query failure or
    /// `RepositoryError::DataCorruption` if stored data is invalid.
    pub async fn get(&self, id: CustomerId) -> Result<Option<Customer>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch(&mut conn, id).await
    }

    /// Fetch a customer by id on an explicit connection.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` on query failure or
    /// `RepositoryError::DataCorruption` if stored data is invalid.
    pub async fn fetch(
        conn: &mut SqliteConnection,
        id: CustomerId,
    ) -> Result<Option<Customer>, RepositoryError> {
        let row = sqlx::query_as::<_, CustomerRow>(
            r"
            SELECT id, name, phone, email, credit_limit, credit_balance,
                   total_orders, total_spent, loyalty_points, loyalty_tier,
                   created_at, updated_at
            FROM customers
            WHERE id = ?1
            ",
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        row.map(Customer::try_from).transpose()
    }

    /// Overwrite lifetime purchase stats and the recomputed tier.
    ///
    /// Money columns are TEXT, so the caller does the arithmetic inside
    /// the same transaction.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the customer does not
    /// exist, `RepositoryError::Database` on query failure.
    pub async fn update_lifetime_stats(
        conn: &mut SqliteConnection,
        id: CustomerId,
        total_orders: i64,
        total_spent: Money,
        loyalty_points: i64,
        loyalty_tier: LoyaltyTier,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE customers
            SET total_orders = ?1, total_spent = ?2, loyalty_points = ?3,
                loyalty_tier = ?4, updated_at = ?5
            WHERE id = ?6
            ",
        )
        .bind(total_orders)
        .bind(total_spent)
        .bind(loyalty_points)
        .bind(loyalty_tier)
        .bind(now)
        .bind(id)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    /// Overwrite the outstanding store-credit balance.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the customer does not
    /// exist, `RepositoryError::Database` on query failure.
    pub async fn set_credit_balance(
        conn: &mut SqliteConnection,
        id: CustomerId,
        balance: Money,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE customers
            SET credit_balance = ?1, updated_at = ?2
            WHERE id = ?3
            ",
        )
        .bind(balance)
        .bind(now)
        .bind(id)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}
