use chrono::{DateTime, Utc};
use quotefeed_core::{StoredPrice, SymbolMetadata};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};

/// Run embedded migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}

/// Load the most recent price observation for a symbol.
pub async fn latest_price(pool: &PgPool, symbol: &str) -> Result<Option<StoredPrice>, sqlx::Error> {
    let row = sqlx::query(
        "SELECT symbol, price, timestamp, created_at
         FROM stock_prices
         WHERE symbol = $1
         ORDER BY timestamp DESC
         LIMIT 1",
    )
    .bind(symbol)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| StoredPrice {
        symbol: r.get("symbol"),
        price: r.get("price"),
        timestamp: r.get("timestamp"),
        created_at: r.get("created_at"),
    }))
}

/// Insert one price observation.
pub async fn insert_price(
    pool: &PgPool,
    symbol: &str,
    price: Decimal,
    timestamp: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO stock_prices (symbol, price, timestamp)
         VALUES ($1, $2, $3)",
    )
    .bind(symbol)
    .bind(price)
    .bind(timestamp)
    .execute(pool)
    .await?;
    Ok(())
}

/// Insert or replace a symbol's metadata.
pub async fn upsert_symbol(pool: &PgPool, metadata: &SymbolMetadata) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO symbols (symbol, name, type, currency)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (symbol) DO UPDATE
         SET name = EXCLUDED.name, type = EXCLUDED.type, currency = EXCLUDED.currency",
    )
    .bind(&metadata.symbol)
    .bind(&metadata.name)
    .bind(&metadata.asset_type)
    .bind(&metadata.currency)
    .execute(pool)
    .await?;
    Ok(())
}

/// Round-trip to the database, for health checks.
pub async fn ping(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
