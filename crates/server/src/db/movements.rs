//! Stock movement repository: the append-only audit trail behind every
//! stock change.

use chrono::{DateTime, Utc};
use duka_core::types::{MovementId, MovementType, ProductId, StaffId};
use sqlx::{SqliteConnection, SqlitePool};

use super::RepositoryError;
use crate::models::movement::StockMovement;

// ===== Internal Row Types =====

#[derive(Debug, sqlx::FromRow)]
struct MovementRow {
    id: i64,
    product_id: i64,
    movement_type: MovementType,
    quantity: i64,
    previous_stock: i64,
    new_stock: i64,
    reference: String,
    reason: Option<String>,
    performed_by: i64,
    created_at: DateTime<Utc>,
}

impl From<MovementRow> for StockMovement {
    fn from(row: MovementRow) -> Self {
        Self {
            id: MovementId::new(row.id),
            product_id: ProductId::new(row.product_id),
            movement_type: row.movement_type,
            quantity: row.quantity,
            previous_stock: row.previous_stock,
            new_stock: row.new_stock,
            reference: row.reference,
            reason: row.reason,
            performed_by: StaffId::new(row.performed_by),
            created_at: row.created_at,
        }
    }
}

// ===== Repository =====

/// A movement to append, with stock levels already resolved by the
/// guarded update it records.
#[derive(Debug)]
pub struct NewMovement {
    pub product_id: ProductId,
    pub movement_type: MovementType,
    pub quantity: i64,
    pub previous_stock: i64,
    pub new_stock: i64,
    pub reference: String,
    pub reason: Option<String>,
    pub performed_by: StaffId,
}

/// Repository for the stock movement log.
pub struct MovementRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> MovementRepository<'a> {
    /// Create a new repository backed by the given pool.
    #[must_use]
    pub const fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Append a movement row.
    ///
    /// Must run on the same connection as the stock update it records so
    /// both commit or roll back together.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` on query failure.
    pub async fn insert(
        conn: &mut SqliteConnection,
        new: NewMovement,
        now: DateTime<Utc>,
    ) -> Result<StockMovement, RepositoryError> {
        let id = sqlx::query_scalar::<_, i64>(
            r"
            INSERT INTO stock_movements (
                product_id, movement_type, quantity, previous_stock,
                new_stock, reference, reason, performed_by, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            RETURNING id
            ",
        )
        .bind(new.product_id)
        .bind(new.movement_type)
        .bind(new.quantity)
        .bind(new.previous_stock)
        .bind(new.new_stock)
        .bind(&new.reference)
        .bind(&new.reason)
        .bind(new.performed_by)
        .bind(now)
        .fetch_one(&mut *conn)
        .await?;

        Ok(StockMovement {
            id: MovementId::new(id),
            product_id: new.product_id,
            movement_type: new.movement_type,
            quantity: new.quantity,
            previous_stock: new.previous_stock,
            new_stock: new.new_stock,
            reference: new.reference,
            reason: new.reason,
            performed_by: new.performed_by,
            created_at: now,
        })
    }

    /// List movements for a product, newest first.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` on query failure.
    pub async fn list_for_product(
        &self,
        product_id: ProductId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<StockMovement>, RepositoryError> {
        let rows = sqlx::query_as::<_, MovementRow>(
            r"
            SELECT id, product_id, movement_type, quantity, previous_stock,
                   new_stock, reference, reason, performed_by, created_at
            FROM stock_movements
            WHERE product_id = ?1
            ORDER BY id DESC
            LIMIT ?2 OFFSET ?3
            ",
        )
        .bind(product_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(StockMovement::from).collect())
    }

    /// Delete all but the newest `keep` movements per product.
    ///
    /// Returns the number of rows removed.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` on query failure.
    pub async fn prune(&self, keep: i64) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            r"
            DELETE FROM stock_movements
            WHERE id NOT IN (
                SELECT sm.id
                FROM stock_movements sm
                WHERE sm.product_id = stock_movements.product_id
                ORDER BY sm.id DESC
                LIMIT ?1
            )
            ",
        )
        .bind(keep)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::products::{NewProduct, ProductRepository};
    use crate::db::testing::memory_pool;
    use duka_core::types::Money;
    use rust_decimal::Decimal;

    async fn seed_product(pool: &SqlitePool, sku: &str) -> ProductId {
        let mut conn = pool.acquire().await.unwrap();
        let new = NewProduct {
            name: format!("Product {sku}"),
            sku: sku.to_owned(),
            description: None,
            category: None,
            price: Money::from_major(50),
            tax_rate: Decimal::new(16, 0),
            min_stock: 0,
            reorder_point: None,
            allow_backorder: false,
            track_inventory: true,
        };
        ProductRepository::insert(&mut conn, &new, Utc::now())
            .await
            .unwrap()
            .id
    }

    fn movement(product_id: ProductId, quantity: i64, level: i64) -> NewMovement {
        NewMovement {
            product_id,
            movement_type: MovementType::Purchase,
            quantity,
            previous_stock: level - quantity,
            new_stock: level,
            reference: format!("PO-{level}"),
            reason: None,
            performed_by: StaffId::new(1),
        }
    }

    #[tokio::test]
    async fn movements_list_newest_first() {
        let pool = memory_pool().await;
        let product_id = seed_product(&pool, "KE-001").await;

        let mut conn = pool.acquire().await.unwrap();
        for level in 1..=3 {
            MovementRepository::insert(&mut conn, movement(product_id, 1, level), Utc::now())
                .await
                .unwrap();
        }
        drop(conn);

        let repo = MovementRepository::new(&pool);
        let log = repo.list_for_product(product_id, 10, 0).await.unwrap();
        assert_eq!(log.len(), 3);
        assert_eq!(log[0].new_stock, 3);
        assert_eq!(log[2].new_stock, 1);

        let page = repo.list_for_product(product_id, 1, 1).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].new_stock, 2);
    }

    #[tokio::test]
    async fn prune_keeps_newest_per_product() {
        let pool = memory_pool().await;
        let first = seed_product(&pool, "KE-001").await;
        let second = seed_product(&pool, "KE-002").await;

        let mut conn = pool.acquire().await.unwrap();
        for level in 1..=5 {
            MovementRepository::insert(&mut conn, movement(first, 1, level), Utc::now())
                .await
                .unwrap();
        }
        for level in 1..=2 {
            MovementRepository::insert(&mut conn, movement(second, 1, level), Utc::now())
                .await
                .unwrap();
        }
        drop(conn);

        let repo = MovementRepository::new(&pool);
        let removed = repo.prune(3).await.unwrap();
        assert_eq!(removed, 2);

        let kept = repo.list_for_product(first, 10, 0).await.unwrap();
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].new_stock, 5);

        let untouched = repo.list_for_product(second, 10, 0).await.unwrap();
        assert_eq!(untouched.len(), 2);
    }
}
