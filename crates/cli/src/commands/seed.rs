//! Seed the database with a product/customer catalog.
//!
//! This command reads a YAML catalog and inserts products and customers
//! through the same service paths the API uses, so opening stock lands
//! in the movement ledger and phone numbers are normalized. Entries
//! that already exist (duplicate SKU or phone) are skipped, which makes
//! the command safe to re-run.

use chrono::Utc;
use secrecy::SecretString;
use serde::Deserialize;
use sqlx::SqlitePool;
use tracing::{info, warn};

use duka_core::StaffId;
use duka_server::db;
use duka_server::error::AppError;
use duka_server::models::customer::CreateCustomerInput;
use duka_server::models::product::CreateProductInput;
use duka_server::services::catalog::CatalogService;

/// Staff ID recorded on seeded opening-stock movements.
const SEED_STAFF: StaffId = StaffId::new(1);

/// Built-in demo catalog for a typical neighborhood duka.
const DEMO_CATALOG: &str = r#"
products:
  - name: Unga wa Ngano 2kg
    sku: FLR-2KG
    category: Dry goods
    price: "185.00"
    initial_stock: 40
    min_stock: 10
  - name: Sukari 1kg
    sku: SGR-1KG
    category: Dry goods
    price: "155.00"
    initial_stock: 60
    min_stock: 15
  - name: Maziwa 500ml
    sku: MLK-500
    category: Dairy
    price: "60.00"
    initial_stock: 80
    min_stock: 24
  - name: Mkate 400g
    sku: BRD-400
    category: Bakery
    price: "65.00"
    initial_stock: 30
    min_stock: 10
  - name: Mafuta ya Kupikia 1L
    sku: OIL-1L
    category: Dry goods
    price: "320.00"
    initial_stock: 25
    min_stock: 8
    reorder_point: 10
  - name: Mchele Pishori 2kg
    sku: RCE-2KG
    category: Dry goods
    price: "310.00"
    initial_stock: 20
    min_stock: 6
  - name: Chumvi 500g
    sku: SLT-500
    category: Dry goods
    price: "35.00"
    initial_stock: 50
    min_stock: 10
  - name: Sabuni ya Kufua
    sku: SOAP-BAR
    category: Household
    price: "75.00"
    initial_stock: 45
    min_stock: 12
  - name: Majani ya Chai 250g
    sku: TEA-250
    category: Beverages
    price: "140.00"
    initial_stock: 35
    min_stock: 10
  - name: Airtime Voucher
    sku: AIR-100
    category: Services
    price: "100.00"
    track_inventory: false

customers:
  - name: Wanjiku Kamau
    phone: "0712 345 678"
    credit_limit: "2000"
  - name: Otieno Odhiambo
    phone: "+254 733 987 654"
    credit_limit: "1500"
  - name: Amina Hassan
    phone: "0110 222 333"
"#;

/// A YAML catalog of products and customers to load.
#[derive(Debug, Deserialize)]
struct SeedCatalog {
    #[serde(default)]
    products: Vec<CreateProductInput>,
    #[serde(default)]
    customers: Vec<CreateCustomerInput>,
}

/// Load a catalog from `file` (or the demo set) into `DATABASE_URL`.
///
/// # Errors
///
/// Returns an error if environment variables are missing, the file
/// cannot be read or parsed, or a non-duplicate insert fails.
pub async fn run(file: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let database_url = std::env::var("DATABASE_URL")
        .map(SecretString::from)
        .map_err(|_| "DATABASE_URL not set")?;

    let content = match file {
        Some(path) => {
            info!(path, "Loading catalog from file");
            tokio::fs::read_to_string(path).await?
        }
        None => {
            info!("Loading built-in demo catalog");
            DEMO_CATALOG.to_owned()
        }
    };

    let catalog: SeedCatalog = serde_yaml::from_str(&content)?;
    info!(
        products = catalog.products.len(),
        customers = catalog.customers.len(),
        "Parsed catalog"
    );

    let pool = db::create_pool(&database_url).await?;
    info!("Connected to database");

    let (product_inserted, product_skipped) = seed_products(&pool, &catalog.products).await?;
    let (customer_inserted, customer_skipped) = seed_customers(&pool, &catalog.customers).await?;

    info!("Seeding complete!");
    info!("  Products inserted: {product_inserted} (skipped {product_skipped})");
    info!("  Customers inserted: {customer_inserted} (skipped {customer_skipped})");

    Ok(())
}

async fn seed_products(
    pool: &SqlitePool,
    products: &[CreateProductInput],
) -> Result<(usize, usize), Box<dyn std::error::Error>> {
    let mut inserted = 0;
    let mut skipped = 0;

    for input in products {
        match CatalogService::create_product(pool, SEED_STAFF, input, Utc::now()).await {
            Ok(product) => {
                info!(sku = %product.sku, stock = product.current_stock, "Created product");
                inserted += 1;
            }
            Err(AppError::Duplicate(_)) => {
                warn!(sku = %input.sku, "Product already exists, skipping");
                skipped += 1;
            }
            Err(e) => return Err(format!("product '{}': {e}", input.sku).into()),
        }
    }

    Ok((inserted, skipped))
}

async fn seed_customers(
    pool: &SqlitePool,
    customers: &[CreateCustomerInput],
) -> Result<(usize, usize), Box<dyn std::error::Error>> {
    let mut inserted = 0;
    let mut skipped = 0;

    for input in customers {
        match CatalogService::create_customer(pool, input, Utc::now()).await {
            Ok(customer) => {
                info!(name = %customer.name, "Created customer");
                inserted += 1;
            }
            Err(AppError::Duplicate(_)) => {
                warn!(name = %input.name, "Customer already exists, skipping");
                skipped += 1;
            }
            Err(e) => return Err(format!("customer '{}': {e}", input.name).into()),
        }
    }

    Ok((inserted, skipped))
}
