//! Stock movements shared by sales, orders, and manual adjustments.
//!
//! Every stock change in the system funnels through [`InventoryService::adjust`]:
//! the level is moved by a single conditional `UPDATE` (so concurrent writers
//! cannot overdraw) and the matching ledger entry is appended in the same
//! transaction.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use duka_core::{MovementType, ProductId, StaffId};

use crate::db::movements::{MovementRepository, NewMovement};
use crate::db::products::ProductRepository;
use crate::error::AppError;
use crate::models::movement::StockMovement;

// ===== Inputs =====

/// One stock movement to apply. `quantity` is always positive; the
/// direction comes from [`MovementType::is_decrease`].
#[derive(Debug, Clone, Copy)]
pub struct StockChange<'a> {
    pub product_id: ProductId,
    pub movement_type: MovementType,
    pub quantity: i64,
    /// What caused the movement (receipt number, order number, ...).
    pub reference: &'a str,
    pub reason: Option<&'a str>,
    pub performed_by: StaffId,
}

// ===== Service =====

/// Applies stock changes and keeps the movement ledger consistent with
/// the stored level.
pub struct InventoryService;

impl InventoryService {
    /// Applies one stock change inside the caller's transaction.
    ///
    /// Returns `Ok(None)` when the product exists but does not track
    /// inventory; sales treat that as "nothing to do" while manual
    /// adjustments reject it, so the decision is left to the caller.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] when `quantity` is not positive,
    /// [`AppError::NotFound`] when the product does not exist, and
    /// [`AppError::InsufficientStock`] when a decrease would drive the
    /// level negative on a product that disallows backorders.
    pub async fn adjust(
        conn: &mut SqliteConnection,
        change: StockChange<'_>,
        now: DateTime<Utc>,
    ) -> Result<Option<StockMovement>, AppError> {
        if change.quantity <= 0 {
            return Err(AppError::Validation(format!(
                "movement quantity must be positive, got {}",
                change.quantity
            )));
        }
        let delta = if change.movement_type.is_decrease() {
            -change.quantity
        } else {
            change.quantity
        };

        let applied =
            ProductRepository::try_apply_stock_delta(conn, change.product_id, delta, now).await?;
        if let Some(new_stock) = applied {
            let movement = MovementRepository::insert(
                conn,
                NewMovement {
                    product_id: change.product_id,
                    movement_type: change.movement_type,
                    quantity: change.quantity,
                    previous_stock: new_stock - delta,
                    new_stock,
                    reference: change.reference.to_owned(),
                    reason: change.reason.map(str::to_owned),
                    performed_by: change.performed_by,
                },
                now,
            )
            .await?;
            return Ok(Some(movement));
        }

        // The conditional update touched no row; work out which guard refused.
        let product = ProductRepository::fetch(conn, change.product_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("product {} not found", change.product_id))
            })?;
        if !product.track_inventory {
            return Ok(None);
        }
        Err(AppError::InsufficientStock {
            product: product.name,
            requested: change.quantity,
            available: product.current_stock,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::products::NewProduct;
    use crate::db::testing::memory_pool;
    use duka_core::types::Money;
    use rust_decimal::Decimal;
    use sqlx::SqlitePool;

    async fn seed_product(
        pool: &SqlitePool,
        sku: &str,
        stock: i64,
        allow_backorder: bool,
        track_inventory: bool,
    ) -> ProductId {
        let mut conn = pool.acquire().await.unwrap();
        let new = NewProduct {
            name: format!("Product {sku}"),
            sku: sku.to_owned(),
            description: None,
            category: None,
            price: Money::from_major(100),
            tax_rate: Decimal::new(16, 0),
            min_stock: 0,
            reorder_point: None,
            allow_backorder,
            track_inventory,
        };
        let product = ProductRepository::insert(&mut conn, &new, Utc::now())
            .await
            .unwrap();
        if stock > 0 {
            ProductRepository::try_apply_stock_delta(&mut conn, product.id, stock, Utc::now())
                .await
                .unwrap()
                .unwrap();
        }
        product.id
    }

    fn change(
        product_id: ProductId,
        movement_type: MovementType,
        quantity: i64,
    ) -> StockChange<'static> {
        StockChange {
            product_id,
            movement_type,
            quantity,
            reference: "RCP26031400001",
            reason: None,
            performed_by: StaffId::new(7),
        }
    }

    #[tokio::test]
    async fn sale_decrements_and_records_movement() {
        let pool = memory_pool().await;
        let product_id = seed_product(&pool, "KE-001", 10, false, true).await;

        let mut conn = pool.acquire().await.unwrap();
        let movement = InventoryService::adjust(
            &mut conn,
            change(product_id, MovementType::Sale, 3),
            Utc::now(),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(movement.previous_stock, 10);
        assert_eq!(movement.new_stock, 7);
        assert_eq!(movement.quantity, 3);
        assert_eq!(movement.reference, "RCP26031400001");

        let product = ProductRepository::fetch(&mut conn, product_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(product.current_stock, 7);
    }

    #[tokio::test]
    async fn purchase_increments() {
        let pool = memory_pool().await;
        let product_id = seed_product(&pool, "KE-001", 2, false, true).await;

        let mut conn = pool.acquire().await.unwrap();
        let movement = InventoryService::adjust(
            &mut conn,
            StockChange {
                reference: "PO-440",
                reason: Some("restock"),
                ..change(product_id, MovementType::Purchase, 5)
            },
            Utc::now(),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(movement.new_stock, 7);
        assert_eq!(movement.reason.as_deref(), Some("restock"));
    }

    #[tokio::test]
    async fn insufficient_stock_is_refused_without_side_effects() {
        let pool = memory_pool().await;
        let product_id = seed_product(&pool, "KE-001", 2, false, true).await;

        let mut conn = pool.acquire().await.unwrap();
        let err = InventoryService::adjust(
            &mut conn,
            change(product_id, MovementType::Sale, 5),
            Utc::now(),
        )
        .await
        .unwrap_err();
        match err {
            AppError::InsufficientStock {
                requested,
                available,
                ..
            } => {
                assert_eq!(requested, 5);
                assert_eq!(available, 2);
            }
            other => panic!("unexpected error: {other}"),
        }

        let product = ProductRepository::fetch(&mut conn, product_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(product.current_stock, 2);
        drop(conn);

        // Seeding went straight through the delta guard, so the ledger
        // must still be empty after the refused sale.
        let log = MovementRepository::new(&pool)
            .list_for_product(product_id, 10, 0)
            .await
            .unwrap();
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn backorder_allows_negative_stock() {
        let pool = memory_pool().await;
        let product_id = seed_product(&pool, "KE-001", 1, true, true).await;

        let mut conn = pool.acquire().await.unwrap();
        let movement = InventoryService::adjust(
            &mut conn,
            change(product_id, MovementType::Sale, 4),
            Utc::now(),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(movement.new_stock, -3);
    }

    #[tokio::test]
    async fn untracked_product_is_left_alone() {
        let pool = memory_pool().await;
        let product_id = seed_product(&pool, "KE-001", 0, false, false).await;

        let mut conn = pool.acquire().await.unwrap();
        let movement = InventoryService::adjust(
            &mut conn,
            change(product_id, MovementType::Sale, 3),
            Utc::now(),
        )
        .await
        .unwrap();
        assert!(movement.is_none());
        drop(conn);

        let log = MovementRepository::new(&pool)
            .list_for_product(product_id, 10, 0)
            .await
            .unwrap();
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn non_positive_quantity_is_rejected() {
        let pool = memory_pool().await;
        let product_id = seed_product(&pool, "KE-001", 10, false, true).await;

        let mut conn = pool.acquire().await.unwrap();
        for quantity in [0, -3] {
            let err = InventoryService::adjust(
                &mut conn,
                change(product_id, MovementType::Sale, quantity),
                Utc::now(),
            )
            .await
            .unwrap_err();
            assert!(matches!(err, AppError::Validation(_)));
        }
    }

    #[tokio::test]
    async fn unknown_product_is_not_found() {
        let pool = memory_pool().await;

        let mut conn = pool.acquire().await.unwrap();
        let err = InventoryService::adjust(
            &mut conn,
            change(ProductId::new(999), MovementType::Sale, 1),
            Utc::now(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
