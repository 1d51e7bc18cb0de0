use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use hublink_core::repository::{InsertOutcome, OrderRepository};
use hublink_core::CoreResult;
use hublink_shared::{Masked, Order, OrderStatus, SubOrder, SubOrderStatus, TrackingEvent};

use crate::database::{corrupt, storage};

pub struct StoreOrderRepository {
    pool: PgPool,
}

impl StoreOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const ORDER_COLUMNS: &str = "id, external_id, customer_id, customer_name, customer_email, customer_phone, \
     shipping_address, shipping_city, shipping_state, subtotal, total, shipping_fee_paid, \
     payment_status, overall_status, created_at, updated_at";

const SUB_ORDER_COLUMNS: &str = "id, order_id, hub_id, courier_id, items, total_weight, items_total, \
     real_shipping_cost, shipping_vat, allocated_shipping_fee, shipping_profit_loss, cost_source, \
     delivery_timeline, courier_order_id, tracking_number, status, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    external_id: String,
    customer_id: Option<String>,
    customer_name: String,
    customer_email: String,
    customer_phone: Option<String>,
    shipping_address: String,
    shipping_city: String,
    shipping_state: String,
    subtotal: Decimal,
    total: Decimal,
    shipping_fee_paid: Decimal,
    payment_status: String,
    overall_status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = hublink_core::CoreError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(Order {
            id: row.id,
            external_id: row.external_id,
            customer_id: row.customer_id,
            customer_name: row.customer_name,
            customer_email: Masked(row.customer_email),
            customer_phone: row.customer_phone.map(Masked),
            shipping_address: row.shipping_address,
            shipping_city: row.shipping_city,
            shipping_state: row.shipping_state,
            subtotal: row.subtotal,
            total: row.total,
            shipping_fee_paid: row.shipping_fee_paid,
            payment_status: row.payment_status,
            overall_status: row
                .overall_status
                .parse::<OrderStatus>()
                .map_err(|e| corrupt("orders.overall_status", e))?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SubOrderRow {
    id: Uuid,
    order_id: Uuid,
    hub_id: Uuid,
    courier_id: Option<Uuid>,
    items: Value,
    total_weight: Decimal,
    items_total: Decimal,
    real_shipping_cost: Decimal,
    shipping_vat: Decimal,
    allocated_shipping_fee: Decimal,
    shipping_profit_loss: Decimal,
    cost_source: String,
    delivery_timeline: Option<String>,
    courier_order_id: Option<String>,
    tracking_number: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SubOrderRow> for SubOrder {
    type Error = hublink_core::CoreError;

    fn try_from(row: SubOrderRow) -> Result<Self, Self::Error> {
        Ok(SubOrder {
            id: row.id,
            order_id: row.order_id,
            hub_id: row.hub_id,
            courier_id: row.courier_id,
            items: serde_json::from_value(row.items).map_err(|e| corrupt("sub_orders.items", e))?,
            total_weight: row.total_weight,
            items_total: row.items_total,
            real_shipping_cost: row.real_shipping_cost,
            shipping_vat: row.shipping_vat,
            allocated_shipping_fee: row.allocated_shipping_fee,
            shipping_profit_loss: row.shipping_profit_loss,
            cost_source: row.cost_source,
            delivery_timeline: row.delivery_timeline,
            courier_order_id: row.courier_order_id,
            tracking_number: row.tracking_number,
            status: row
                .status
                .parse::<SubOrderStatus>()
                .map_err(|e| corrupt("sub_orders.status", e))?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TrackingEventRow {
    id: Uuid,
    sub_order_id: Uuid,
    status: String,
    provider_status: Option<String>,
    description: Option<String>,
    source: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<TrackingEventRow> for TrackingEvent {
    type Error = hublink_core::CoreError;

    fn try_from(row: TrackingEventRow) -> Result<Self, Self::Error> {
        Ok(TrackingEvent {
            id: row.id,
            sub_order_id: row.sub_order_id,
            status: row.status.parse().map_err(|e| corrupt("tracking_events.status", e))?,
            provider_status: row.provider_status,
            description: row.description,
            source: row.source.parse().map_err(|e| corrupt("tracking_events.source", e))?,
            created_at: row.created_at,
        })
    }
}

fn collect<R, T>(rows: Vec<R>) -> CoreResult<Vec<T>>
where
    T: TryFrom<R, Error = hublink_core::CoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

#[async_trait]
impl OrderRepository for StoreOrderRepository {
    async fn find_order_by_external_id(&self, external_id: &str) -> CoreResult<Option<Order>> {
        let sql = format!("SELECT {} FROM orders WHERE external_id = $1", ORDER_COLUMNS);
        let row: Option<OrderRow> = sqlx::query_as(&sql)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        row.map(Order::try_from).transpose()
    }

    async fn get_order(&self, id: Uuid) -> CoreResult<Option<Order>> {
        let sql = format!("SELECT {} FROM orders WHERE id = $1", ORDER_COLUMNS);
        let row: Option<OrderRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        row.map(Order::try_from).transpose()
    }

    async fn insert_order(&self, order: &Order) -> CoreResult<InsertOutcome> {
        let inserted: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO orders (id, external_id, customer_id, customer_name, customer_email, customer_phone,
                                shipping_address, shipping_city, shipping_state, subtotal, total,
                                shipping_fee_paid, payment_status, overall_status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (external_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(order.id)
        .bind(&order.external_id)
        .bind(&order.customer_id)
        .bind(&order.customer_name)
        .bind(order.customer_email.expose())
        .bind(order.customer_phone.as_ref().map(|p| p.expose().clone()))
        .bind(&order.shipping_address)
        .bind(&order.shipping_city)
        .bind(&order.shipping_state)
        .bind(order.subtotal)
        .bind(order.total)
        .bind(order.shipping_fee_paid)
        .bind(&order.payment_status)
        .bind(order.overall_status.as_str())
        .bind(order.created_at)
        .bind(order.updated_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        if let Some((id,)) = inserted {
            return Ok(InsertOutcome::Inserted(id));
        }

        let (existing,): (Uuid,) = sqlx::query_as("SELECT id FROM orders WHERE external_id = $1")
            .bind(&order.external_id)
            .fetch_one(&self.pool)
            .await
            .map_err(storage)?;

        Ok(InsertOutcome::Existing(existing))
    }

    async fn insert_sub_order(&self, sub_order: &SubOrder) -> CoreResult<InsertOutcome> {
        let items = serde_json::to_value(&sub_order.items)
            .map_err(|e| hublink_core::CoreError::InternalError(e.to_string()))?;

        let inserted: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO sub_orders (id, order_id, hub_id, courier_id, items, total_weight, items_total,
                                    real_shipping_cost, shipping_vat, allocated_shipping_fee,
                                    shipping_profit_loss, cost_source, delivery_timeline,
                                    courier_order_id, tracking_number, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            ON CONFLICT (order_id, hub_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(sub_order.id)
        .bind(sub_order.order_id)
        .bind(sub_order.hub_id)
        .bind(sub_order.courier_id)
        .bind(items)
        .bind(sub_order.total_weight)
        .bind(sub_order.items_total)
        .bind(sub_order.real_shipping_cost)
        .bind(sub_order.shipping_vat)
        .bind(sub_order.allocated_shipping_fee)
        .bind(sub_order.shipping_profit_loss)
        .bind(&sub_order.cost_source)
        .bind(&sub_order.delivery_timeline)
        .bind(&sub_order.courier_order_id)
        .bind(&sub_order.tracking_number)
        .bind(sub_order.status.as_str())
        .bind(sub_order.created_at)
        .bind(sub_order.updated_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        if let Some((id,)) = inserted {
            return Ok(InsertOutcome::Inserted(id));
        }

        let (existing,): (Uuid,) =
            sqlx::query_as("SELECT id FROM sub_orders WHERE order_id = $1 AND hub_id = $2")
                .bind(sub_order.order_id)
                .bind(sub_order.hub_id)
                .fetch_one(&self.pool)
                .await
                .map_err(storage)?;

        Ok(InsertOutcome::Existing(existing))
    }

    async fn get_sub_order(&self, id: Uuid) -> CoreResult<Option<SubOrder>> {
        let sql = format!("SELECT {} FROM sub_orders WHERE id = $1", SUB_ORDER_COLUMNS);
        let row: Option<SubOrderRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        row.map(SubOrder::try_from).transpose()
    }

    async fn find_sub_order_by_tracking(&self, tracking_number: &str) -> CoreResult<Option<SubOrder>> {
        let sql = format!("SELECT {} FROM sub_orders WHERE tracking_number = $1", SUB_ORDER_COLUMNS);
        let row: Option<SubOrderRow> = sqlx::query_as(&sql)
            .bind(tracking_number)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        row.map(SubOrder::try_from).transpose()
    }

    async fn list_sub_orders(&self, order_id: Uuid) -> CoreResult<Vec<SubOrder>> {
        let sql = format!(
            "SELECT {} FROM sub_orders WHERE order_id = $1 ORDER BY created_at",
            SUB_ORDER_COLUMNS
        );
        let rows: Vec<SubOrderRow> = sqlx::query_as(&sql)
            .bind(order_id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;

        collect(rows)
    }

    async fn list_trackable_sub_orders(&self) -> CoreResult<Vec<SubOrder>> {
        let sql = format!(
            "SELECT {} FROM sub_orders \
             WHERE tracking_number IS NOT NULL \
               AND status NOT IN ('delivered', 'cancelled', 'returned') \
             ORDER BY updated_at",
            SUB_ORDER_COLUMNS
        );
        let rows: Vec<SubOrderRow> = sqlx::query_as(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;

        collect(rows)
    }

    async fn record_shipment(
        &self,
        sub_order_id: Uuid,
        courier_order_id: &str,
        tracking_number: &str,
    ) -> CoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sub_orders
            SET courier_order_id = $1, tracking_number = $2, status = 'assigned', updated_at = NOW()
            WHERE id = $3 AND tracking_number IS NULL
            "#,
        )
        .bind(courier_order_id)
        .bind(tracking_number)
        .bind(sub_order_id)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(result.rows_affected() == 1)
    }

    async fn update_sub_order_status(
        &self,
        sub_order_id: Uuid,
        from: SubOrderStatus,
        to: SubOrderStatus,
    ) -> CoreResult<bool> {
        let result = sqlx::query(
            "UPDATE sub_orders SET status = $1, updated_at = NOW() WHERE id = $2 AND status = $3",
        )
        .bind(to.as_str())
        .bind(sub_order_id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_order_status(&self, order_id: Uuid, status: OrderStatus) -> CoreResult<()> {
        sqlx::query("UPDATE orders SET overall_status = $1, updated_at = NOW() WHERE id = $2")
            .bind(status.as_str())
            .bind(order_id)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }

    async fn append_tracking_event(&self, event: &TrackingEvent) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tracking_events (id, sub_order_id, status, provider_status, description, source, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(event.id)
        .bind(event.sub_order_id)
        .bind(event.status.as_str())
        .bind(&event.provider_status)
        .bind(&event.description)
        .bind(event.source.as_str())
        .bind(event.created_at)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn list_tracking_events(&self, sub_order_id: Uuid) -> CoreResult<Vec<TrackingEvent>> {
        let rows: Vec<TrackingEventRow> = sqlx::query_as(
            "SELECT id, sub_order_id, status, provider_status, description, source, created_at \
             FROM tracking_events WHERE sub_order_id = $1 ORDER BY created_at",
        )
        .bind(sub_order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        collect(rows)
    }
}
