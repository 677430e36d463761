//! Point-of-sale checkout: sale creation, voiding, and refunds.
//!
//! Each operation runs in a single transaction. Prices and tax rates are
//! snapshotted from the catalog at checkout; the client only sends product
//! ids, quantities, and discounts. The sale state machine is `completed →
//! voided` and `completed → partial_refund → refunded`, with no exit from
//! the terminal states.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{SqliteConnection, SqlitePool};

use duka_core::sale::{LineTotals, line_totals, refund_amount, sale_totals, status_after_refund};
use duka_core::types::{LoyaltyTier, Money, MovementType, MpesaStatus, PaymentMethod, PaymentStatus};
use duka_core::{SaleId, StaffId, loyalty};

use crate::db::RepositoryError;
use crate::db::customers::CustomerRepository;
use crate::db::mpesa::MpesaRepository;
use crate::db::products::ProductRepository;
use crate::db::sales::{NewSale, SaleRepository};
use crate::error::AppError;
use crate::models::customer::Customer;
use crate::models::product::Product;
use crate::models::sale::{
    CreateSaleInput, RefundSaleInput, SaleItem, SaleItemInput, SaleWithItems, VoidSaleInput,
};
use crate::services::inventory::{InventoryService, StockChange};
use crate::services::sequence::SequenceService;

/// One validated checkout line: the product snapshot plus the computed
/// amounts for the requested quantity.
struct CheckoutLine {
    product: Product,
    quantity: i64,
    discount_percent: Decimal,
    totals: LineTotals,
}

/// How a sale settled: the header fields plus the follow-up write the
/// settlement requires once the sale row exists.
struct Settlement {
    payment_status: PaymentStatus,
    total_paid: Money,
    change: Money,
    checkout_request_id: Option<String>,
    /// New store-credit balance to persist for a credit sale.
    new_credit_balance: Option<Money>,
}

/// Orchestrates the sale lifecycle over the repositories.
pub struct SaleService;

impl SaleService {
    /// Create a sale: snapshot products, compute totals, claim a receipt
    /// number, settle payment, and decrement stock, all in one
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] for malformed input or an
    /// uncovering payment, [`AppError::NotFound`] for unknown products or
    /// customers, [`AppError::InsufficientStock`] when a line cannot be
    /// served, [`AppError::StateConflict`] when an M-Pesa transaction is
    /// not in `success` state or store credit does not cover the total,
    /// and [`AppError::Duplicate`] when the M-Pesa transaction is already
    /// linked to another sale.
    pub async fn create(
        pool: &SqlitePool,
        actor: StaffId,
        input: &CreateSaleInput,
        now: DateTime<Utc>,
    ) -> Result<SaleWithItems, AppError> {
        validate_sale_items(&input.items)?;

        let mut tx = pool.begin().await.map_err(RepositoryError::from)?;

        let customer = match input.customer_id {
            Some(id) => Some(
                CustomerRepository::fetch(&mut tx, id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("customer {id} not found")))?,
            ),
            None => None,
        };

        let lines = snapshot_lines(&mut tx, &input.items).await?;
        let totals = sale_totals(lines.iter().map(|line| &line.totals));

        let settlement = Self::settle(&mut tx, input, customer.as_ref(), totals.total).await?;

        let receipt_number = SequenceService::next_receipt_number(&mut tx, now).await?;

        let sale = SaleRepository::insert(
            &mut tx,
            &NewSale {
                receipt_number,
                customer_id: input.customer_id,
                subtotal: totals.subtotal,
                discount_total: totals.discount_total,
                tax_total: totals.tax_total,
                total: totals.total,
                payment_method: input.payment.method,
                payment_status: settlement.payment_status,
                total_paid: settlement.total_paid,
                change: settlement.change,
                mpesa_checkout_request_id: settlement.checkout_request_id.clone(),
                notes: input.notes.clone(),
                created_by: actor,
            },
            now,
        )
        .await?;

        let mut items = Vec::with_capacity(lines.len());
        for line in &lines {
            let item = SaleItem {
                sale_id: sale.id,
                product_id: line.product.id,
                product_name: line.product.name.clone(),
                sku: line.product.sku.clone(),
                quantity: line.quantity,
                unit_price: line.product.price,
                discount_percent: line.discount_percent,
                tax_rate: line.product.tax_rate,
                subtotal: line.totals.total,
                refunded_quantity: 0,
            };
            SaleRepository::insert_item(&mut tx, &item).await?;
            items.push(item);
        }

        for line in &lines {
            InventoryService::adjust(
                &mut tx,
                StockChange {
                    product_id: line.product.id,
                    movement_type: MovementType::Sale,
                    quantity: line.quantity,
                    reference: &sale.receipt_number,
                    reason: None,
                    performed_by: actor,
                },
                now,
            )
            .await?;
            ProductRepository::update_sale_stats(
                &mut tx,
                line.product.id,
                line.product.total_sold + line.quantity,
                line.product.total_revenue + line.totals.total,
                now,
            )
            .await?;
        }

        // Settlement writes that need the sale id or happen alongside it.
        if let Some(checkout_request_id) = &settlement.checkout_request_id {
            let claimed =
                MpesaRepository::link_sale(&mut tx, checkout_request_id, sale.id, now).await?;
            if !claimed {
                return Err(AppError::Duplicate(format!(
                    "M-Pesa transaction {checkout_request_id} is already linked to a sale"
                )));
            }
        }
        if let (Some(customer), Some(balance)) = (&customer, settlement.new_credit_balance) {
            CustomerRepository::set_credit_balance(&mut tx, customer.id, balance, now).await?;
        }

        if let Some(customer) = &customer {
            apply_lifetime_purchase(&mut tx, customer, totals.total, now).await?;
        }

        tx.commit().await.map_err(RepositoryError::from)?;

        tracing::info!(
            receipt = %sale.receipt_number,
            total = %sale.total,
            method = %sale.payment_method,
            "sale completed"
        );

        Ok(SaleWithItems { sale, items })
    }

    /// Void a completed sale and restore the exact sold quantities to
    /// stock via `return` movements.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] for an unknown sale and
    /// [`AppError::StateConflict`] when the sale is not voidable.
    pub async fn void(
        pool: &SqlitePool,
        actor: StaffId,
        sale_id: SaleId,
        input: &VoidSaleInput,
        now: DateTime<Utc>,
    ) -> Result<SaleWithItems, AppError> {
        if input.reason.trim().is_empty() {
            return Err(AppError::Validation("a void reason is required".to_owned()));
        }

        let mut tx = pool.begin().await.map_err(RepositoryError::from)?;

        let sale = SaleRepository::fetch(&mut tx, sale_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("sale {sale_id} not found")))?;
        if !sale.status.can_void() {
            return Err(AppError::StateConflict(format!(
                "sale {} is {}; only completed sales can be voided",
                sale.receipt_number, sale.status
            )));
        }

        let voided = SaleRepository::mark_voided(&mut tx, sale_id, actor, &input.reason, now).await?;
        if !voided {
            // Someone else finished a void or refund between the read and
            // the conditional update.
            return Err(AppError::StateConflict(format!(
                "sale {} is no longer voidable",
                sale.receipt_number
            )));
        }

        let items = SaleRepository::fetch_items(&mut tx, sale_id).await?;
        for item in &items {
            InventoryService::adjust(
                &mut tx,
                StockChange {
                    product_id: item.product_id,
                    movement_type: MovementType::Return,
                    quantity: item.quantity,
                    reference: &sale.receipt_number,
                    reason: Some(&input.reason),
                    performed_by: actor,
                },
                now,
            )
            .await?;
        }

        let result = load(&mut tx, sale_id).await?;
        tx.commit().await.map_err(RepositoryError::from)?;

        tracing::info!(receipt = %result.sale.receipt_number, "sale voided");
        Ok(result)
    }

    /// Refund some or all items of a sale.
    ///
    /// Each line's refundable quantity is claimed with a conditional
    /// update on the `refunded_quantity` accumulator, so two overlapping
    /// refunds can never return the same units twice. The refund amount
    /// is proportional to the line total, and the cumulative refunded
    /// total decides between `partial_refund` and `refunded`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] when the sale is unknown or a
    /// product was not part of it, [`AppError::StateConflict`] when the
    /// sale is not refundable or a quantity exceeds what remains, and
    /// [`AppError::Validation`] for malformed input.
    pub async fn refund(
        pool: &SqlitePool,
        actor: StaffId,
        sale_id: SaleId,
        input: &RefundSaleInput,
        now: DateTime<Utc>,
    ) -> Result<SaleWithItems, AppError> {
        if input.items.is_empty() {
            return Err(AppError::Validation(
                "a refund requires at least one item".to_owned(),
            ));
        }
        if input.reason.trim().is_empty() {
            return Err(AppError::Validation(
                "a refund reason is required".to_owned(),
            ));
        }
        for (i, item) in input.items.iter().enumerate() {
            if item.quantity <= 0 {
                return Err(AppError::Validation(format!(
                    "refund item {i}: quantity must be positive, got {}",
                    item.quantity
                )));
            }
            if input.items.iter().take(i).any(|prev| prev.product_id == item.product_id) {
                return Err(AppError::Validation(format!(
                    "refund item {i}: product {} appears more than once",
                    item.product_id
                )));
            }
        }

        let mut tx = pool.begin().await.map_err(RepositoryError::from)?;

        let sale = SaleRepository::fetch(&mut tx, sale_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("sale {sale_id} not found")))?;
        if !sale.status.can_refund() {
            return Err(AppError::StateConflict(format!(
                "sale {} is {} and cannot be refunded",
                sale.receipt_number, sale.status
            )));
        }

        let items = SaleRepository::fetch_items(&mut tx, sale_id).await?;
        let mut refund_total = Money::ZERO;
        for request in &input.items {
            let line = items
                .iter()
                .find(|item| item.product_id == request.product_id)
                .ok_or_else(|| {
                    AppError::NotFound(format!(
                        "product {} was not part of sale {}",
                        request.product_id, sale.receipt_number
                    ))
                })?;

            let claimed = SaleRepository::claim_refund_quantity(
                &mut tx,
                sale_id,
                request.product_id,
                request.quantity,
            )
            .await?;
            if !claimed {
                return Err(AppError::StateConflict(format!(
                    "cannot refund {} x product {}: {} of {} already refunded",
                    request.quantity,
                    request.product_id,
                    line.refunded_quantity,
                    line.quantity
                )));
            }

            refund_total += refund_amount(line.subtotal, line.quantity, request.quantity);

            InventoryService::adjust(
                &mut tx,
                StockChange {
                    product_id: request.product_id,
                    movement_type: MovementType::Return,
                    quantity: request.quantity,
                    reference: &sale.receipt_number,
                    reason: Some(&input.reason),
                    performed_by: actor,
                },
                now,
            )
            .await?;
        }

        let refunded_total = sale.refunded_total + refund_total;
        let status = status_after_refund(refunded_total, sale.total);
        SaleRepository::apply_refund(
            &mut tx,
            sale_id,
            status,
            refunded_total,
            actor,
            &input.reason,
            now,
        )
        .await?;

        let result = load(&mut tx, sale_id).await?;
        tx.commit().await.map_err(RepositoryError::from)?;

        tracing::info!(
            receipt = %result.sale.receipt_number,
            refunded = %refund_total,
            status = %result.sale.status,
            "sale refunded"
        );
        Ok(result)
    }

    /// Validate the payment block against the sale total and decide the
    /// header fields. Settlement reads happen here; writes that need the
    /// sale id are deferred to the caller.
    async fn settle(
        conn: &mut SqliteConnection,
        input: &CreateSaleInput,
        customer: Option<&Customer>,
        total: Money,
    ) -> Result<Settlement, AppError> {
        match input.payment.method {
            PaymentMethod::Cash => {
                let paid = input.payment.total_paid.ok_or_else(|| {
                    AppError::Validation("total_paid is required for cash sales".to_owned())
                })?;
                if paid < total {
                    return Err(AppError::Validation(format!(
                        "cash tendered {paid} does not cover total {total}"
                    )));
                }
                Ok(Settlement {
                    payment_status: PaymentStatus::Paid,
                    total_paid: paid,
                    change: paid - total,
                    checkout_request_id: None,
                    new_credit_balance: None,
                })
            }
            PaymentMethod::Mpesa => {
                let checkout_request_id =
                    input.payment.checkout_request_id.clone().ok_or_else(|| {
                        AppError::Validation(
                            "checkout_request_id is required for M-Pesa sales".to_owned(),
                        )
                    })?;
                let transaction = MpesaRepository::fetch(conn, &checkout_request_id)
                    .await?
                    .ok_or_else(|| {
                        AppError::NotFound(format!(
                            "M-Pesa transaction {checkout_request_id} not found"
                        ))
                    })?;
                if transaction.status != MpesaStatus::Success {
                    return Err(AppError::StateConflict(format!(
                        "M-Pesa transaction {checkout_request_id} is {}, not success",
                        transaction.status
                    )));
                }
                if transaction.sale_id.is_some() {
                    return Err(AppError::Duplicate(format!(
                        "M-Pesa transaction {checkout_request_id} is already linked to a sale"
                    )));
                }
                if transaction.amount < total {
                    return Err(AppError::Validation(format!(
                        "M-Pesa amount {} does not cover total {total}",
                        transaction.amount
                    )));
                }
                Ok(Settlement {
                    payment_status: PaymentStatus::Paid,
                    total_paid: transaction.amount,
                    change: Money::ZERO,
                    checkout_request_id: Some(checkout_request_id),
                    new_credit_balance: None,
                })
            }
            PaymentMethod::Card => {
                let paid = input.payment.total_paid.unwrap_or(total);
                if paid != total {
                    return Err(AppError::Validation(format!(
                        "card payments must match the total exactly: paid {paid}, total {total}"
                    )));
                }
                Ok(Settlement {
                    payment_status: PaymentStatus::Paid,
                    total_paid: paid,
                    change: Money::ZERO,
                    checkout_request_id: None,
                    new_credit_balance: None,
                })
            }
            PaymentMethod::Credit => {
                let customer = customer.ok_or_else(|| {
                    AppError::Validation("credit sales require a customer".to_owned())
                })?;
                if customer.available_credit() < total {
                    return Err(AppError::StateConflict(format!(
                        "customer {} has {} credit available, total is {total}",
                        customer.name,
                        customer.available_credit()
                    )));
                }
                Ok(Settlement {
                    payment_status: PaymentStatus::Pending,
                    total_paid: Money::ZERO,
                    change: Money::ZERO,
                    checkout_request_id: None,
                    new_credit_balance: Some(customer.credit_balance + total),
                })
            }
        }
    }
}

/// Reject structurally invalid sale lines before touching the database.
fn validate_sale_items(items: &[SaleItemInput]) -> Result<(), AppError> {
    if items.is_empty() {
        return Err(AppError::Validation(
            "a sale requires at least one item".to_owned(),
        ));
    }
    for (i, item) in items.iter().enumerate() {
        if item.quantity <= 0 {
            return Err(AppError::Validation(format!(
                "item {i}: quantity must be positive, got {}",
                item.quantity
            )));
        }
        if let Some(discount) = item.discount_percent
            && !(Decimal::ZERO..=Decimal::ONE_HUNDRED).contains(&discount)
        {
            return Err(AppError::Validation(format!(
                "item {i}: discount must be between 0 and 100, got {discount}"
            )));
        }
        if items.iter().take(i).any(|prev| prev.product_id == item.product_id) {
            return Err(AppError::Validation(format!(
                "item {i}: product {} appears more than once",
                item.product_id
            )));
        }
    }
    Ok(())
}

/// Re-read each product and compute line amounts from the stored price
/// and tax rate. Client-sent prices are ignored by design of the input
/// shape, which never carries them.
async fn snapshot_lines(
    conn: &mut SqliteConnection,
    items: &[SaleItemInput],
) -> Result<Vec<CheckoutLine>, AppError> {
    let mut lines = Vec::with_capacity(items.len());
    for item in items {
        let product = ProductRepository::fetch(conn, item.product_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("product {} not found", item.product_id)))?;
        if !product.active {
            return Err(AppError::Validation(format!(
                "product '{}' is inactive",
                product.name
            )));
        }
        let discount_percent = item.discount_percent.unwrap_or(Decimal::ZERO);
        let totals = line_totals(item.quantity, product.price, discount_percent, product.tax_rate);
        lines.push(CheckoutLine {
            product,
            quantity: item.quantity,
            discount_percent,
            totals,
        });
    }
    Ok(lines)
}

/// Fold one purchase into the customer's lifetime stats and recompute
/// the tier from the new totals.
async fn apply_lifetime_purchase(
    conn: &mut SqliteConnection,
    customer: &Customer,
    total: Money,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    let total_orders = customer.total_orders + 1;
    let total_spent = customer.total_spent + total;
    let loyalty_points = customer.loyalty_points + loyalty::points_for(total);
    let tier = LoyaltyTier::for_totals(total_spent, total_orders);
    CustomerRepository::update_lifetime_stats(
        conn,
        customer.id,
        total_orders,
        total_spent,
        loyalty_points,
        tier,
        now,
    )
    .await?;
    Ok(())
}

/// Assemble the sale with fresh rows on the caller's connection.
async fn load(conn: &mut SqliteConnection, id: SaleId) -> Result<SaleWithItems, AppError> {
    let sale = SaleRepository::fetch(conn, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("sale {id} not found")))?;
    let items = SaleRepository::fetch_items(conn, id).await?;
    Ok(SaleWithItems { sale, items })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::mpesa::NewMpesaTransaction;
    use crate::db::products::NewProduct;
    use crate::db::testing::memory_pool;
    use crate::models::sale::{RefundItemInput, SalePaymentInput};
    use duka_core::types::{PhoneNumber, SaleStatus};
    use duka_core::{CustomerId, ProductId};

    async fn seed_product(pool: &SqlitePool, sku: &str, price: i64, stock: i64) -> ProductId {
        let mut conn = pool.acquire().await.unwrap();
        let product = ProductRepository::insert(
            &mut conn,
            &NewProduct {
                name: format!("Product {sku}"),
                sku: sku.to_owned(),
                description: None,
                category: None,
                price: Money::from_major(price),
                tax_rate: Decimal::new(16, 0),
                min_stock: 0,
                reorder_point: None,
                allow_backorder: false,
                track_inventory: true,
            },
            Utc::now(),
        )
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

    async fn seed_customer(pool: &SqlitePool, credit_limit: i64) -> CustomerId {
        CustomerRepository::new(pool)
            .create(
                "Wanjiku",
                Some(&PhoneNumber::parse("0712345678").unwrap()),
                None,
                Money::from_major(credit_limit),
                Utc::now(),
            )
            .await
            .unwrap()
            .id
    }

    fn cash_input(product_id: ProductId, quantity: i64, tendered: i64) -> CreateSaleInput {
        CreateSaleInput {
            customer_id: None,
            items: vec![SaleItemInput {
                product_id,
                quantity,
                discount_percent: None,
            }],
            payment: SalePaymentInput {
                method: PaymentMethod::Cash,
                total_paid: Some(Money::from_major(tendered)),
                checkout_request_id: None,
            },
            notes: None,
        }
    }

    async fn stock_of(pool: &SqlitePool, id: ProductId) -> i64 {
        ProductRepository::new(pool)
            .get(id)
            .await
            .unwrap()
            .unwrap()
            .current_stock
    }

    #[tokio::test]
    async fn cash_sale_snapshots_prices_and_decrements_stock() {
        let pool = memory_pool().await;
        let product_id = seed_product(&pool, "KE-001", 100, 10).await;

        // 2 x 100 + 16% tax = 232
        let sale = SaleService::create(
            &pool,
            StaffId::new(1),
            &cash_input(product_id, 2, 300),
            Utc::now(),
        )
        .await
        .unwrap();

        assert_eq!(sale.sale.subtotal, Money::from_major(200));
        assert_eq!(sale.sale.tax_total, Money::from_major(32));
        assert_eq!(sale.sale.total, Money::from_major(232));
        assert_eq!(sale.sale.change, Money::from_major(68));
        assert_eq!(sale.sale.payment_status, PaymentStatus::Paid);
        assert!(sale.sale.receipt_number.starts_with("RCP"));
        assert_eq!(sale.items.len(), 1);
        assert_eq!(sale.items[0].unit_price, Money::from_major(100));
        assert_eq!(sale.items[0].subtotal, Money::from_major(232));

        assert_eq!(stock_of(&pool, product_id).await, 8);
    }

    #[tokio::test]
    async fn cash_under_tender_is_rejected() {
        let pool = memory_pool().await;
        let product_id = seed_product(&pool, "KE-001", 100, 10).await;

        let err = SaleService::create(
            &pool,
            StaffId::new(1),
            &cash_input(product_id, 2, 200),
            Utc::now(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        // Nothing committed.
        assert_eq!(stock_of(&pool, product_id).await, 10);
    }

    #[tokio::test]
    async fn insufficient_stock_rolls_back_the_whole_sale() {
        let pool = memory_pool().await;
        let plenty = seed_product(&pool, "KE-001", 50, 100).await;
        let scarce = seed_product(&pool, "KE-002", 80, 1).await;

        let input = CreateSaleInput {
            customer_id: None,
            items: vec![
                SaleItemInput {
                    product_id: plenty,
                    quantity: 5,
                    discount_percent: None,
                },
                SaleItemInput {
                    product_id: scarce,
                    quantity: 3,
                    discount_percent: None,
                },
            ],
            payment: SalePaymentInput {
                method: PaymentMethod::Cash,
                total_paid: Some(Money::from_major(1000)),
                checkout_request_id: None,
            },
            notes: None,
        };

        let err = SaleService::create(&pool, StaffId::new(1), &input, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InsufficientStock { .. }));

        // The first line's decrement must not survive the rollback.
        assert_eq!(stock_of(&pool, plenty).await, 100);
        assert_eq!(stock_of(&pool, scarce).await, 1);
        assert!(
            SaleRepository::new(&pool)
                .list_recent(10, 0)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn overlapping_sales_cannot_both_drain_the_stock() {
        let pool = memory_pool().await;
        let product_id = seed_product(&pool, "KE-001", 50, 10).await;

        // Each sale alone fits; together they want 12 of 10.
        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..2 {
            let pool = pool.clone();
            tasks.spawn(async move {
                SaleService::create(
                    &pool,
                    StaffId::new(1),
                    &cash_input(product_id, 6, 400),
                    Utc::now(),
                )
                .await
            });
        }

        let mut outcomes = Vec::new();
        while let Some(result) = tasks.join_next().await {
            outcomes.push(result.unwrap());
        }

        let sold = outcomes.iter().filter(|r| r.is_ok()).count();
        assert_eq!(sold, 1);
        assert!(outcomes.iter().any(
            |r| matches!(r, Err(AppError::InsufficientStock { available, .. }) if *available == 4)
        ));
        assert_eq!(stock_of(&pool, product_id).await, 4);
    }

    #[tokio::test]
    async fn duplicate_product_lines_are_rejected() {
        let pool = memory_pool().await;
        let product_id = seed_product(&pool, "KE-001", 100, 10).await;

        let input = CreateSaleInput {
            customer_id: None,
            items: vec![
                SaleItemInput {
                    product_id,
                    quantity: 1,
                    discount_percent: None,
                },
                SaleItemInput {
                    product_id,
                    quantity: 2,
                    discount_percent: None,
                },
            ],
            payment: SalePaymentInput {
                method: PaymentMethod::Cash,
                total_paid: Some(Money::from_major(500)),
                checkout_request_id: None,
            },
            notes: None,
        };

        let err = SaleService::create(&pool, StaffId::new(1), &input, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn credit_sale_checks_the_limit_and_charges_the_balance() {
        let pool = memory_pool().await;
        let product_id = seed_product(&pool, "KE-001", 100, 10).await;
        let customer_id = seed_customer(&pool, 1000).await;

        let input = CreateSaleInput {
            customer_id: Some(customer_id),
            items: vec![SaleItemInput {
                product_id,
                quantity: 2,
                discount_percent: None,
            }],
            payment: SalePaymentInput {
                method: PaymentMethod::Credit,
                total_paid: None,
                checkout_request_id: None,
            },
            notes: None,
        };

        let sale = SaleService::create(&pool, StaffId::new(1), &input, Utc::now())
            .await
            .unwrap();
        assert_eq!(sale.sale.payment_status, PaymentStatus::Pending);
        assert_eq!(sale.sale.total_paid, Money::ZERO);

        let customer = CustomerRepository::new(&pool)
            .get(customer_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(customer.credit_balance, Money::from_major(232));
        assert_eq!(customer.total_orders, 1);
        assert_eq!(customer.total_spent, Money::from_major(232));
        // 232 shillings = 2 whole hundreds.
        assert_eq!(customer.loyalty_points, 2);

        // A second large credit sale must bounce off the remaining limit.
        let input = CreateSaleInput {
            items: vec![SaleItemInput {
                product_id,
                quantity: 7,
                discount_percent: None,
            }],
            ..input
        };
        let err = SaleService::create(&pool, StaffId::new(1), &input, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::StateConflict(_)));
    }

    #[tokio::test]
    async fn mpesa_sale_links_the_transaction_exactly_once() {
        let pool = memory_pool().await;
        let product_id = seed_product(&pool, "KE-001", 100, 10).await;

        let repo = MpesaRepository::new(&pool);
        repo.insert(
            &NewMpesaTransaction {
                checkout_request_id: "ws_CO_1".to_owned(),
                merchant_request_id: "mr_1".to_owned(),
                phone_number: PhoneNumber::parse("0712345678").unwrap(),
                amount: Money::from_major(232),
                account_reference: "POS-1".to_owned(),
                transaction_desc: "till".to_owned(),
            },
            Utc::now(),
        )
        .await
        .unwrap();
        repo.transition_from_pending(
            "ws_CO_1",
            MpesaStatus::Success,
            0,
            "ok",
            Some("TAH12XYZ"),
            None,
            Utc::now(),
        )
        .await
        .unwrap();

        let input = CreateSaleInput {
            customer_id: None,
            items: vec![SaleItemInput {
                product_id,
                quantity: 2,
                discount_percent: None,
            }],
            payment: SalePaymentInput {
                method: PaymentMethod::Mpesa,
                total_paid: None,
                checkout_request_id: Some("ws_CO_1".to_owned()),
            },
            notes: None,
        };

        let sale = SaleService::create(&pool, StaffId::new(1), &input, Utc::now())
            .await
            .unwrap();
        assert_eq!(sale.sale.payment_status, PaymentStatus::Paid);
        assert_eq!(sale.sale.total_paid, Money::from_major(232));
        assert_eq!(
            sale.sale.mpesa_checkout_request_id.as_deref(),
            Some("ws_CO_1")
        );

        let transaction = repo.get("ws_CO_1").await.unwrap().unwrap();
        assert_eq!(transaction.sale_id, Some(sale.sale.id));

        // The same transaction cannot pay for a second sale.
        let err = SaleService::create(&pool, StaffId::new(1), &input, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Duplicate(_)));
    }

    #[tokio::test]
    async fn mpesa_sale_requires_a_successful_transaction() {
        let pool = memory_pool().await;
        let product_id = seed_product(&pool, "KE-001", 100, 10).await;

        MpesaRepository::new(&pool)
            .insert(
                &NewMpesaTransaction {
                    checkout_request_id: "ws_CO_2".to_owned(),
                    merchant_request_id: "mr_2".to_owned(),
                    phone_number: PhoneNumber::parse("0712345678").unwrap(),
                    amount: Money::from_major(1000),
                    account_reference: "POS-2".to_owned(),
                    transaction_desc: "till".to_owned(),
                },
                Utc::now(),
            )
            .await
            .unwrap();

        let input = CreateSaleInput {
            customer_id: None,
            items: vec![SaleItemInput {
                product_id,
                quantity: 1,
                discount_percent: None,
            }],
            payment: SalePaymentInput {
                method: PaymentMethod::Mpesa,
                total_paid: None,
                checkout_request_id: Some("ws_CO_2".to_owned()),
            },
            notes: None,
        };

        let err = SaleService::create(&pool, StaffId::new(1), &input, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::StateConflict(_)));
    }

    #[tokio::test]
    async fn void_restores_stock_and_is_single_shot() {
        let pool = memory_pool().await;
        let product_id = seed_product(&pool, "KE-001", 100, 10).await;
        let sale = SaleService::create(
            &pool,
            StaffId::new(1),
            &cash_input(product_id, 3, 400),
            Utc::now(),
        )
        .await
        .unwrap();
        assert_eq!(stock_of(&pool, product_id).await, 7);

        let voided = SaleService::void(
            &pool,
            StaffId::new(2),
            sale.sale.id,
            &VoidSaleInput {
                reason: "test transaction".to_owned(),
            },
            Utc::now(),
        )
        .await
        .unwrap();
        assert_eq!(voided.sale.status, SaleStatus::Voided);
        assert_eq!(voided.sale.voided_by, Some(StaffId::new(2)));
        assert_eq!(stock_of(&pool, product_id).await, 10);

        let err = SaleService::void(
            &pool,
            StaffId::new(2),
            sale.sale.id,
            &VoidSaleInput {
                reason: "again".to_owned(),
            },
            Utc::now(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::StateConflict(_)));
    }

    #[tokio::test]
    async fn partial_refund_then_full_refund_walks_the_status() {
        let pool = memory_pool().await;
        let product_id = seed_product(&pool, "KE-001", 100, 10).await;
        let sale = SaleService::create(
            &pool,
            StaffId::new(1),
            &cash_input(product_id, 4, 500),
            Utc::now(),
        )
        .await
        .unwrap();
        // 4 x 100 + 16% = 464
        assert_eq!(sale.sale.total, Money::from_major(464));
        assert_eq!(stock_of(&pool, product_id).await, 6);

        let partial = SaleService::refund(
            &pool,
            StaffId::new(1),
            sale.sale.id,
            &RefundSaleInput {
                items: vec![RefundItemInput {
                    product_id,
                    quantity: 1,
                }],
                reason: "damaged".to_owned(),
            },
            Utc::now(),
        )
        .await
        .unwrap();
        assert_eq!(partial.sale.status, SaleStatus::PartialRefund);
        assert_eq!(partial.sale.refunded_total, Money::from_major(116));
        assert_eq!(partial.items[0].refunded_quantity, 1);
        assert_eq!(stock_of(&pool, product_id).await, 7);

        let full = SaleService::refund(
            &pool,
            StaffId::new(1),
            sale.sale.id,
            &RefundSaleInput {
                items: vec![RefundItemInput {
                    product_id,
                    quantity: 3,
                }],
                reason: "order cancelled".to_owned(),
            },
            Utc::now(),
        )
        .await
        .unwrap();
        assert_eq!(full.sale.status, SaleStatus::Refunded);
        assert_eq!(full.sale.refunded_total, Money::from_major(464));
        assert_eq!(stock_of(&pool, product_id).await, 10);
    }

    #[tokio::test]
    async fn refund_cannot_exceed_what_remains() {
        let pool = memory_pool().await;
        let product_id = seed_product(&pool, "KE-001", 100, 10).await;
        let sale = SaleService::create(
            &pool,
            StaffId::new(1),
            &cash_input(product_id, 2, 300),
            Utc::now(),
        )
        .await
        .unwrap();

        SaleService::refund(
            &pool,
            StaffId::new(1),
            sale.sale.id,
            &RefundSaleInput {
                items: vec![RefundItemInput {
                    product_id,
                    quantity: 1,
                }],
                reason: "damaged".to_owned(),
            },
            Utc::now(),
        )
        .await
        .unwrap();

        // 2 sold, 1 refunded: claiming 2 more must fail and change nothing.
        let err = SaleService::refund(
            &pool,
            StaffId::new(1),
            sale.sale.id,
            &RefundSaleInput {
                items: vec![RefundItemInput {
                    product_id,
                    quantity: 2,
                }],
                reason: "damaged".to_owned(),
            },
            Utc::now(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::StateConflict(_)));

        let current = SaleRepository::new(&pool)
            .get_with_items(sale.sale.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.items[0].refunded_quantity, 1);
        assert_eq!(current.sale.status, SaleStatus::PartialRefund);
    }

    #[tokio::test]
    async fn refund_of_foreign_product_is_not_found() {
        let pool = memory_pool().await;
        let product_id = seed_product(&pool, "KE-001", 100, 10).await;
        let other = seed_product(&pool, "KE-002", 50, 10).await;
        let sale = SaleService::create(
            &pool,
            StaffId::new(1),
            &cash_input(product_id, 2, 300),
            Utc::now(),
        )
        .await
        .unwrap();

        let err = SaleService::refund(
            &pool,
            StaffId::new(1),
            sale.sale.id,
            &RefundSaleInput {
                items: vec![RefundItemInput {
                    product_id: other,
                    quantity: 1,
                }],
                reason: "wrong".to_owned(),
            },
            Utc::now(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn voided_sale_cannot_be_refunded() {
        let pool = memory_pool().await;
        let product_id = seed_product(&pool, "KE-001", 100, 10).await;
        let sale = SaleService::create(
            &pool,
            StaffId::new(1),
            &cash_input(product_id, 1, 200),
            Utc::now(),
        )
        .await
        .unwrap();
        SaleService::void(
            &pool,
            StaffId::new(1),
            sale.sale.id,
            &VoidSaleInput {
                reason: "mistake".to_owned(),
            },
            Utc::now(),
        )
        .await
        .unwrap();

        let err = SaleService::refund(
            &pool,
            StaffId::new(1),
            sale.sale.id,
            &RefundSaleInput {
                items: vec![RefundItemInput {
                    product_id,
                    quantity: 1,
                }],
                reason: "nope".to_owned(),
            },
            Utc::now(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::StateConflict(_)));
    }

    #[tokio::test]
    async fn untracked_products_sell_without_touching_stock() {
        let pool = memory_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let product = ProductRepository::insert(
            &mut conn,
            &NewProduct {
                name: "Service fee".to_owned(),
                sku: "SVC-001".to_owned(),
                description: None,
                category: None,
                price: Money::from_major(50),
                tax_rate: Decimal::ZERO,
                min_stock: 0,
                reorder_point: None,
                allow_backorder: false,
                track_inventory: false,
            },
            Utc::now(),
        )
        .await
        .unwrap();
        drop(conn);

        let sale = SaleService::create(
            &pool,
            StaffId::new(1),
            &cash_input(product.id, 1, 50),
            Utc::now(),
        )
        .await
        .unwrap();
        assert_eq!(sale.sale.total, Money::from_major(50));
        assert_eq!(stock_of(&pool, product.id).await, 0);
    }
}
