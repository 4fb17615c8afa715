use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{
    LifecycleEvent, Money, NoopObserver, Order, OrderId, OrderItem, OrderPage, OrderStatus,
    PageRequest, Product, ProductId, SharedObserver, UserId,
};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::{
    LedgerError, Result,
    store::{Ledger, OrderLedger, StockLedger, UnitOfWork},
};

const LEDGER_NAME: &str = "postgres";

const PRODUCT_COLUMNS: &str = "id, name, category, stock, price_cents, created_at, updated_at";
const ORDER_COLUMNS: &str = "id, user_id, status, total_cents, created_at, updated_at";

/// PostgreSQL-backed ledger implementation.
///
/// Units of work map onto database transactions; rows read through them are
/// locked with `SELECT ... FOR UPDATE`.
#[derive(Clone)]
pub struct PostgresLedger {
    pool: PgPool,
    observer: SharedObserver,
}

impl PostgresLedger {
    /// Creates a new PostgreSQL ledger.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            observer: Arc::new(NoopObserver),
        }
    }

    /// Opens a pool of at most `max_connections` connections to `url`.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Reports lifecycle events to `observer`.
    pub fn with_observer(mut self, observer: SharedObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Inserts or replaces a product.
    pub async fn insert_product(&self, product: &Product) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, category, stock, price_cents, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name,
                category = EXCLUDED.category,
                stock = EXCLUDED.stock,
                price_cents = EXCLUDED.price_cents,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.name)
        .bind(&product.category)
        .bind(product.stock)
        .bind(product.price.cents())
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn row_to_product(row: PgRow) -> Result<Product> {
    Ok(Product {
        id: ProductId::from_uuid(row.try_get::<Uuid, _>("id")?),
        name: row.try_get("name")?,
        category: row.try_get("category")?,
        stock: row.try_get("stock")?,
        price: Money::from_cents(row.try_get("price_cents")?),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_order_header(row: PgRow) -> Result<Order> {
    let status: String = row.try_get("status")?;
    let status: OrderStatus = status
        .parse()
        .map_err(|e| LedgerError::Corrupt(format!("order status: {e}")))?;

    Ok(Order {
        id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
        user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
        items: Vec::new(),
        status,
        total: Money::from_cents(row.try_get("total_cents")?),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_item(row: PgRow) -> Result<OrderItem> {
    let quantity: i64 = row.try_get("quantity")?;
    let quantity = u32::try_from(quantity)
        .map_err(|_| LedgerError::Corrupt(format!("item quantity {quantity}")))?;

    Ok(OrderItem {
        order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
        product_id: ProductId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
        quantity,
    })
}

async fn fetch_product(
    conn: &mut PgConnection,
    id: ProductId,
    for_update: bool,
) -> Result<Product> {
    let mut sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1");
    if for_update {
        sql.push_str(" FOR UPDATE");
    }

    let row = sqlx::query(&sql)
        .bind(id.as_uuid())
        .fetch_optional(&mut *conn)
        .await?;
    row.map(row_to_product)
        .transpose()?
        .ok_or(LedgerError::ProductNotFound(id))
}

async fn fetch_items(conn: &mut PgConnection, ids: &[Uuid]) -> Result<Vec<OrderItem>> {
    let rows = sqlx::query(
        r#"
        SELECT order_id, product_id, quantity
        FROM order_items
        WHERE order_id = ANY($1)
        ORDER BY order_id, position ASC
        "#,
    )
    .bind(ids)
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(row_to_item).collect()
}

async fn fetch_order(
    conn: &mut PgConnection,
    id: OrderId,
    for_update: bool,
) -> Result<Option<Order>> {
    let mut sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
    if for_update {
        sql.push_str(" FOR UPDATE");
    }

    let Some(row) = sqlx::query(&sql)
        .bind(id.as_uuid())
        .fetch_optional(&mut *conn)
        .await?
    else {
        return Ok(None);
    };

    let mut order = row_to_order_header(row)?;
    order.items = fetch_items(conn, &[id.as_uuid()]).await?;
    Ok(Some(order))
}

#[async_trait]
impl StockLedger for PostgresLedger {
    async fn get_product(&self, id: ProductId) -> Result<Product> {
        let mut conn = self.pool.acquire().await?;
        fetch_product(&mut conn, id, false).await
    }

    #[tracing::instrument(skip(self))]
    async fn adjust_stock(&self, id: ProductId, delta: i64) -> Result<Product> {
        let mut tx = self.pool.begin().await?;
        let mut product = fetch_product(&mut tx, id, true).await?;

        let next = product.stock.saturating_add(delta);
        if next < 0 {
            tx.rollback().await?;
            let err = LedgerError::InsufficientStock {
                product_id: id,
                requested: delta.saturating_neg(),
                available: product.stock,
            };
            self.observer
                .observe(LifecycleEvent::StockAdjustmentRejected {
                    product_id: id,
                    delta,
                    reason: err.to_string(),
                });
            return Err(err);
        }

        product.stock = next;
        product.updated_at = Utc::now();
        sqlx::query("UPDATE products SET stock = $2, updated_at = $3 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(product.stock)
            .bind(product.updated_at)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        self.observer.observe(LifecycleEvent::StockAdjusted {
            product_id: id,
            delta,
            stock: product.stock,
        });
        Ok(product)
    }
}

#[async_trait]
impl OrderLedger for PostgresLedger {
    async fn get_order(&self, id: OrderId) -> Result<Order> {
        let mut conn = self.pool.acquire().await?;
        fetch_order(&mut conn, id, false)
            .await?
            .ok_or(LedgerError::OrderNotFound(id))
    }

    #[tracing::instrument(skip(self))]
    async fn list_orders(&self, user_id: UserId, page: PageRequest) -> Result<OrderPage> {
        let mut conn = self.pool.acquire().await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .fetch_one(&mut *conn)
            .await?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT {ORDER_COLUMNS}
            FROM orders
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(user_id.as_uuid())
        .bind(i64::from(page.page_size))
        .bind(page.offset() as i64)
        .fetch_all(&mut *conn)
        .await?;

        let mut orders = rows
            .into_iter()
            .map(row_to_order_header)
            .collect::<Result<Vec<_>>>()?;

        let ids: Vec<Uuid> = orders.iter().map(|o| o.id.as_uuid()).collect();
        let mut items_by_order: HashMap<OrderId, Vec<OrderItem>> = HashMap::new();
        for item in fetch_items(&mut conn, &ids).await? {
            items_by_order.entry(item.order_id).or_default().push(item);
        }
        for order in &mut orders {
            order.items = items_by_order.remove(&order.id).unwrap_or_default();
        }

        Ok(OrderPage {
            orders,
            total: total.max(0) as u64,
            page: page.page,
            page_size: page.page_size,
        })
    }
}

#[async_trait]
impl Ledger for PostgresLedger {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresUnitOfWork {
            tx: Some(tx),
            observer: Arc::clone(&self.observer),
        }))
    }
}

/// A unit of work backed by a database transaction.
///
/// If the handle is dropped while the transaction is still open, sqlx rolls
/// it back when the connection returns to the pool.
struct PostgresUnitOfWork {
    tx: Option<Transaction<'static, Postgres>>,
    observer: SharedObserver,
}

impl PostgresUnitOfWork {
    fn conn(&mut self) -> Result<&mut PgConnection> {
        self.tx
            .as_deref_mut()
            .ok_or_else(|| LedgerError::Unavailable("unit of work already finished".to_string()))
    }
}

#[async_trait]
impl UnitOfWork for PostgresUnitOfWork {
    async fn lock_product(&mut self, id: ProductId) -> Result<Product> {
        fetch_product(self.conn()?, id, true).await
    }

    async fn reserve_stock(&mut self, id: ProductId, quantity: u32) -> Result<Product> {
        let conn = self.conn()?;
        let mut product = fetch_product(conn, id, true).await?;
        if !product.has_stock(quantity) {
            return Err(LedgerError::InsufficientStock {
                product_id: id,
                requested: quantity as i64,
                available: product.stock,
            });
        }

        product.stock -= quantity as i64;
        product.updated_at = Utc::now();
        sqlx::query("UPDATE products SET stock = $2, updated_at = $3 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(product.stock)
            .bind(product.updated_at)
            .execute(&mut *conn)
            .await?;
        Ok(product)
    }

    async fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>> {
        fetch_order(self.conn()?, id, true).await
    }

    async fn write_order(&mut self, draft: &Order) -> Result<Order> {
        let conn = self.conn()?;
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, status, total_cents, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE
            SET total_cents = orders.total_cents + EXCLUDED.total_cents,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(draft.id.as_uuid())
        .bind(draft.user_id.as_uuid())
        .bind(draft.status.as_str())
        .bind(draft.total.cents())
        .bind(draft.created_at)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        for item in &draft.items {
            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, product_id, quantity, position)
                VALUES (
                    $1, $2, $3,
                    (SELECT COALESCE(MAX(position) + 1, 0) FROM order_items WHERE order_id = $1)
                )
                ON CONFLICT (order_id, product_id) DO UPDATE
                SET quantity = order_items.quantity + EXCLUDED.quantity
                "#,
            )
            .bind(draft.id.as_uuid())
            .bind(item.product_id.as_uuid())
            .bind(i64::from(item.quantity))
            .execute(&mut *conn)
            .await?;
        }

        fetch_order(conn, draft.id, false)
            .await?
            .ok_or(LedgerError::OrderNotFound(draft.id))
    }

    async fn set_status(&mut self, id: OrderId, status: OrderStatus) -> Result<Order> {
        let conn = self.conn()?;
        let result = sqlx::query("UPDATE orders SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(status.as_str())
            .bind(Utc::now())
            .execute(&mut *conn)
            .await?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::OrderNotFound(id));
        }

        fetch_order(conn, id, false)
            .await?
            .ok_or(LedgerError::OrderNotFound(id))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut this = self;
        if let Some(tx) = this.tx.take() {
            tx.commit().await?;
            this.observer
                .observe(LifecycleEvent::UnitOfWorkCommitted {
                    ledger: LEDGER_NAME,
                });
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let mut this = self;
        if let Some(tx) = this.tx.take() {
            tx.rollback().await?;
            this.observer
                .observe(LifecycleEvent::UnitOfWorkRolledBack {
                    ledger: LEDGER_NAME,
                });
        }
        Ok(())
    }
}

impl Drop for PostgresUnitOfWork {
    fn drop(&mut self) {
        if self.tx.is_some() {
            self.observer
                .observe(LifecycleEvent::UnitOfWorkRolledBack {
                    ledger: LEDGER_NAME,
                });
        }
    }
}
