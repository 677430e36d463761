//! Catalog writes: product and customer registration, manual stock
//! adjustments.
//!
//! Products are inserted with zero stock; opening stock goes through the
//! inventory ledger as a `purchase` movement in the same transaction, so
//! the movement log replays to the current level from day one.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::SqlitePool;

use duka_core::StaffId;
use duka_core::types::{Money, MovementType, PhoneNumber, ProductId};

use crate::db::RepositoryError;
use crate::db::customers::CustomerRepository;
use crate::db::products::{NewProduct, ProductRepository};
use crate::error::AppError;
use crate::models::customer::{CreateCustomerInput, Customer};
use crate::models::movement::{StockAdjustmentInput, StockMovement};
use crate::models::product::{CreateProductInput, Product};
use crate::services::inventory::{InventoryService, StockChange};

/// VAT percentage applied when a product does not name one.
const DEFAULT_TAX_RATE: i64 = 16;
/// Ledger reference for opening-stock movements.
const OPENING_STOCK_REFERENCE: &str = "opening stock";
/// Ledger reference for manual adjustments.
const MANUAL_REFERENCE: &str = "manual adjustment";

/// Catalog and customer registration.
pub struct CatalogService;

impl CatalogService {
    /// Register a product, recording any opening stock through the
    /// ledger.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] for bad input and
    /// [`AppError::Duplicate`] when the SKU is taken.
    pub async fn create_product(
        pool: &SqlitePool,
        actor: StaffId,
        input: &CreateProductInput,
        now: DateTime<Utc>,
    ) -> Result<Product, AppError> {
        let name = input.name.trim();
        let sku = input.sku.trim();
        if name.is_empty() {
            return Err(AppError::Validation("product name is required".to_owned()));
        }
        if sku.is_empty() {
            return Err(AppError::Validation("SKU is required".to_owned()));
        }
        if input.price.is_negative() {
            return Err(AppError::Validation(format!(
                "price cannot be negative, got {}",
                input.price
            )));
        }
        let tax_rate = input
            .tax_rate
            .unwrap_or_else(|| Decimal::new(DEFAULT_TAX_RATE, 0));
        if !(Decimal::ZERO..=Decimal::ONE_HUNDRED).contains(&tax_rate) {
            return Err(AppError::Validation(format!(
                "tax rate must be between 0 and 100, got {tax_rate}"
            )));
        }
        let min_stock = input.min_stock.unwrap_or(0);
        let initial_stock = input.initial_stock.unwrap_or(0);
        if min_stock < 0 || initial_stock < 0 || input.reorder_point.is_some_and(|p| p < 0) {
            return Err(AppError::Validation(
                "stock levels cannot be negative".to_owned(),
            ));
        }
        let track_inventory = input.track_inventory.unwrap_or(true);
        if initial_stock > 0 && !track_inventory {
            return Err(AppError::Validation(
                "untracked products cannot carry opening stock".to_owned(),
            ));
        }

        let mut tx = pool.begin().await.map_err(RepositoryError::from)?;

        let new = NewProduct {
            name: name.to_owned(),
            sku: sku.to_owned(),
            description: input.description.clone(),
            category: input.category.clone(),
            price: input.price,
            tax_rate,
            min_stock,
            reorder_point: input.reorder_point,
            allow_backorder: input.allow_backorder.unwrap_or(false),
            track_inventory,
        };
        let mut product = ProductRepository::insert(&mut tx, &new, now).await?;

        if initial_stock > 0 {
            InventoryService::adjust(
                &mut tx,
                StockChange {
                    product_id: product.id,
                    movement_type: MovementType::Purchase,
                    quantity: initial_stock,
                    reference: OPENING_STOCK_REFERENCE,
                    reason: None,
                    performed_by: actor,
                },
                now,
            )
            .await?;
            product = ProductRepository::fetch(&mut tx, product.id)
                .await?
                .ok_or(RepositoryError::NotFound)
                .map_err(AppError::from)?;
        }

        tx.commit().await.map_err(RepositoryError::from)?;

        tracing::info!(sku = %product.sku, stock = product.current_stock, "product created");
        Ok(product)
    }

    /// Register a customer, normalizing the phone number.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] for bad input and
    /// [`AppError::Duplicate`] when the phone is registered already.
    pub async fn create_customer(
        pool: &SqlitePool,
        input: &CreateCustomerInput,
        now: DateTime<Utc>,
    ) -> Result<Customer, AppError> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("customer name is required".to_owned()));
        }
        let phone = input
            .phone
            .as_deref()
            .map(PhoneNumber::parse)
            .transpose()
            .map_err(|e| AppError::Validation(e.to_string()))?;
        let credit_limit = input.credit_limit.unwrap_or(Money::ZERO);
        if credit_limit.is_negative() {
            return Err(AppError::Validation(format!(
                "credit limit cannot be negative, got {credit_limit}"
            )));
        }

        let customer = CustomerRepository::new(pool)
            .create(name, phone.as_ref(), input.email.as_deref(), credit_limit, now)
            .await?;

        tracing::info!(customer = %customer.id, "customer created");
        Ok(customer)
    }

    /// Apply a manual stock adjustment through the ledger.
    ///
    /// Unlike sales, a manual adjustment against an untracked product is
    /// an error rather than a no-op: there is no stock to adjust.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] for non-positive quantities and
    /// untracked products, [`AppError::NotFound`] for unknown products,
    /// and [`AppError::InsufficientStock`] when a decrease would overdraw.
    pub async fn adjust_stock(
        pool: &SqlitePool,
        actor: StaffId,
        product_id: ProductId,
        input: &StockAdjustmentInput,
        now: DateTime<Utc>,
    ) -> Result<StockMovement, AppError> {
        let mut tx = pool.begin().await.map_err(RepositoryError::from)?;

        let movement = InventoryService::adjust(
            &mut tx,
            StockChange {
                product_id,
                movement_type: input.movement_type,
                quantity: input.quantity,
                reference: MANUAL_REFERENCE,
                reason: input.reason.as_deref(),
                performed_by: actor,
            },
            now,
        )
        .await?;
        let Some(movement) = movement else {
            return Err(AppError::Validation(format!(
                "product {product_id} does not track inventory"
            )));
        };

        tx.commit().await.map_err(RepositoryError::from)?;

        tracing::info!(
            product = %product_id,
            movement_type = %movement.movement_type,
            quantity = movement.quantity,
            new_stock = movement.new_stock,
            "stock adjusted"
        );
        Ok(movement)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::movements::MovementRepository;
    use crate::db::testing::memory_pool;

    fn product_input(sku: &str) -> CreateProductInput {
        CreateProductInput {
            name: format!("Product {sku}"),
            sku: sku.to_owned(),
            description: None,
            category: Some("staples".to_owned()),
            price: Money::from_major(185),
            tax_rate: None,
            initial_stock: Some(24),
            min_stock: Some(6),
            reorder_point: None,
            allow_backorder: None,
            track_inventory: None,
        }
    }

    #[tokio::test]
    async fn create_product_records_opening_stock_in_the_ledger() {
        let pool = memory_pool().await;

        let product =
            CatalogService::create_product(&pool, StaffId::new(1), &product_input("UNGA-2KG"), Utc::now())
                .await
                .unwrap();
        assert_eq!(product.current_stock, 24);
        assert_eq!(product.tax_rate, Decimal::new(16, 0));
        assert!(product.track_inventory);

        let log = MovementRepository::new(&pool)
            .list_for_product(product.id, 10, 0)
            .await
            .unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].movement_type, MovementType::Purchase);
        assert_eq!(log[0].quantity, 24);
        assert_eq!(log[0].previous_stock, 0);
        assert_eq!(log[0].new_stock, 24);
        assert_eq!(log[0].reference, "opening stock");
    }

    #[tokio::test]
    async fn duplicate_sku_is_rejected() {
        let pool = memory_pool().await;
        CatalogService::create_product(&pool, StaffId::new(1), &product_input("UNGA-2KG"), Utc::now())
            .await
            .unwrap();

        let err = CatalogService::create_product(
            &pool,
            StaffId::new(1),
            &product_input("UNGA-2KG"),
            Utc::now(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Duplicate(_)));
    }

    #[tokio::test]
    async fn untracked_products_refuse_opening_stock() {
        let pool = memory_pool().await;
        let mut input = product_input("DELIVERY-FEE");
        input.track_inventory = Some(false);

        let err = CatalogService::create_product(&pool, StaffId::new(1), &input, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        input.initial_stock = None;
        let product = CatalogService::create_product(&pool, StaffId::new(1), &input, Utc::now())
            .await
            .unwrap();
        assert!(!product.track_inventory);
    }

    #[tokio::test]
    async fn create_customer_normalizes_the_phone() {
        let pool = memory_pool().await;

        let customer = CatalogService::create_customer(
            &pool,
            &CreateCustomerInput {
                name: "  Wanjiku  ".to_owned(),
                phone: Some("0712 345 678".to_owned()),
                email: None,
                credit_limit: Some(Money::from_major(3000)),
            },
            Utc::now(),
        )
        .await
        .unwrap();
        assert_eq!(customer.name, "Wanjiku");
        assert_eq!(customer.phone.unwrap().as_str(), "254712345678");
        assert_eq!(customer.credit_limit, Money::from_major(3000));

        let err = CatalogService::create_customer(
            &pool,
            &CreateCustomerInput {
                name: "Bad Phone".to_owned(),
                phone: Some("12345".to_owned()),
                email: None,
                credit_limit: None,
            },
            Utc::now(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn manual_adjustment_moves_stock_and_logs() {
        let pool = memory_pool().await;
        let product =
            CatalogService::create_product(&pool, StaffId::new(1), &product_input("SUKARI-1KG"), Utc::now())
                .await
                .unwrap();

        let movement = CatalogService::adjust_stock(
            &pool,
            StaffId::new(2),
            product.id,
            &StockAdjustmentInput {
                quantity: 4,
                movement_type: MovementType::Damage,
                reason: Some("burst bags".to_owned()),
            },
            Utc::now(),
        )
        .await
        .unwrap();
        assert_eq!(movement.previous_stock, 24);
        assert_eq!(movement.new_stock, 20);
        assert_eq!(movement.performed_by, StaffId::new(2));

        let err = CatalogService::adjust_stock(
            &pool,
            StaffId::new(2),
            product.id,
            &StockAdjustmentInput {
                quantity: 100,
                movement_type: MovementType::Sale,
                reason: None,
            },
            Utc::now(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::InsufficientStock { .. }));
    }

    #[tokio::test]
    async fn manual_adjustment_rejects_untracked_products() {
        let pool = memory_pool().await;
        let mut input = product_input("SERVICE");
        input.initial_stock = None;
        input.track_inventory = Some(false);
        let product = CatalogService::create_product(&pool, StaffId::new(1), &input, Utc::now())
            .await
            .unwrap();

        let err = CatalogService::adjust_stock(
            &pool,
            StaffId::new(1),
            product.id,
            &StockAdjustmentInput {
                quantity: 1,
                movement_type: MovementType::Purchase,
                reason: None,
            },
            Utc::now(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
