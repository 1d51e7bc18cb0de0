use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use hublink_core::repository::ReturnRepository;
use hublink_core::{CoreError, CoreResult};
use hublink_shared::{Masked, ReturnRequest, ReturnShipment, ReturnStatus};

use crate::database::{corrupt, storage};

pub struct StoreReturnRepository {
    pool: PgPool,
}

impl StoreReturnRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const REQUEST_COLUMNS: &str = "id, order_id, customer_id, customer_email, method, resolution, reason, evidence, \
     status, hub_id, inspection_result, inspection_notes, approved_refund_amount, refund_amount, \
     refund_currency, refund_reference, refund_raw, refund_completed_at, created_at, updated_at";

const SHIPMENT_COLUMNS: &str = "id, return_request_id, method, courier_id, courier_order_id, tracking_id, status, \
     pickup_address, hub_address, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct ReturnRequestRow {
    id: Uuid,
    order_id: Uuid,
    customer_id: Option<String>,
    customer_email: String,
    method: String,
    resolution: String,
    reason: String,
    evidence: Value,
    status: String,
    hub_id: Option<Uuid>,
    inspection_result: Option<String>,
    inspection_notes: Option<String>,
    approved_refund_amount: Option<Decimal>,
    refund_amount: Option<Decimal>,
    refund_currency: Option<String>,
    refund_reference: Option<String>,
    refund_raw: Option<Value>,
    refund_completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ReturnRequestRow> for ReturnRequest {
    type Error = CoreError;

    fn try_from(row: ReturnRequestRow) -> Result<Self, Self::Error> {
        Ok(ReturnRequest {
            id: row.id,
            order_id: row.order_id,
            customer_id: row.customer_id,
            customer_email: Masked(row.customer_email),
            method: row.method.parse().map_err(|e| corrupt("return_requests.method", e))?,
            resolution: row
                .resolution
                .parse()
                .map_err(|e| corrupt("return_requests.resolution", e))?,
            reason: row.reason,
            evidence: serde_json::from_value(row.evidence)
                .map_err(|e| corrupt("return_requests.evidence", e))?,
            status: row.status.parse().map_err(|e| corrupt("return_requests.status", e))?,
            hub_id: row.hub_id,
            inspection_result: row.inspection_result,
            inspection_notes: row.inspection_notes,
            approved_refund_amount: row.approved_refund_amount,
            refund_amount: row.refund_amount,
            refund_currency: row.refund_currency,
            refund_reference: row.refund_reference,
            refund_raw: row.refund_raw,
            refund_completed_at: row.refund_completed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ReturnShipmentRow {
    id: Uuid,
    return_request_id: Uuid,
    method: String,
    courier_id: Option<Uuid>,
    courier_order_id: Option<String>,
    tracking_id: Option<String>,
    status: String,
    pickup_address: Option<String>,
    hub_address: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ReturnShipmentRow> for ReturnShipment {
    type Error = CoreError;

    fn try_from(row: ReturnShipmentRow) -> Result<Self, Self::Error> {
        Ok(ReturnShipment {
            id: row.id,
            return_request_id: row.return_request_id,
            method: row.method.parse().map_err(|e| corrupt("return_shipments.method", e))?,
            courier_id: row.courier_id,
            courier_order_id: row.courier_order_id,
            tracking_id: row.tracking_id,
            status: row.status.parse().map_err(|e| corrupt("return_shipments.status", e))?,
            pickup_address: row.pickup_address,
            hub_address: row.hub_address,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl ReturnRepository for StoreReturnRepository {
    async fn insert_return(&self, request: &ReturnRequest, shipment: &ReturnShipment) -> CoreResult<()> {
        let evidence = serde_json::to_value(&request.evidence)
            .map_err(|e| CoreError::InternalError(e.to_string()))?;

        let mut tx = self.pool.begin().await.map_err(storage)?;

        sqlx::query(
            r#"
            INSERT INTO return_requests (id, order_id, customer_id, customer_email, method, resolution, reason,
                                         evidence, status, hub_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(request.id)
        .bind(request.order_id)
        .bind(&request.customer_id)
        .bind(request.customer_email.expose())
        .bind(request.method.as_str())
        .bind(request.resolution.as_str())
        .bind(&request.reason)
        .bind(evidence)
        .bind(request.status.as_str())
        .bind(request.hub_id)
        .bind(request.created_at)
        .bind(request.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        sqlx::query(
            r#"
            INSERT INTO return_shipments (id, return_request_id, method, courier_id, courier_order_id, tracking_id,
                                          status, pickup_address, hub_address, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(shipment.id)
        .bind(shipment.return_request_id)
        .bind(shipment.method.as_str())
        .bind(shipment.courier_id)
        .bind(&shipment.courier_order_id)
        .bind(&shipment.tracking_id)
        .bind(shipment.status.as_str())
        .bind(&shipment.pickup_address)
        .bind(&shipment.hub_address)
        .bind(shipment.created_at)
        .bind(shipment.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        tx.commit().await.map_err(storage)?;
        Ok(())
    }

    async fn get_return(&self, id: Uuid) -> CoreResult<Option<ReturnRequest>> {
        let sql = format!("SELECT {} FROM return_requests WHERE id = $1", REQUEST_COLUMNS);
        let row: Option<ReturnRequestRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        row.map(ReturnRequest::try_from).transpose()
    }

    async fn find_open_return_for_order(&self, order_id: Uuid) -> CoreResult<Option<ReturnRequest>> {
        let sql = format!(
            "SELECT {} FROM return_requests \
             WHERE order_id = $1 AND status NOT IN ('rejected', 'refund_completed', 'cancelled') \
               AND NOT (status = 'approved' AND resolution = 'replacement') \
             ORDER BY created_at DESC LIMIT 1",
            REQUEST_COLUMNS
        );
        let row: Option<ReturnRequestRow> = sqlx::query_as(&sql)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        row.map(ReturnRequest::try_from).transpose()
    }

    async fn update_return(&self, request: &ReturnRequest, expected: ReturnStatus) -> CoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE return_requests
            SET status = $1, hub_id = $2, inspection_result = $3, inspection_notes = $4,
                approved_refund_amount = $5, refund_amount = $6, refund_currency = $7,
                refund_reference = $8, refund_raw = $9, refund_completed_at = $10, updated_at = NOW()
            WHERE id = $11 AND status = $12
            "#,
        )
        .bind(request.status.as_str())
        .bind(request.hub_id)
        .bind(&request.inspection_result)
        .bind(&request.inspection_notes)
        .bind(request.approved_refund_amount)
        .bind(request.refund_amount)
        .bind(&request.refund_currency)
        .bind(&request.refund_reference)
        .bind(&request.refund_raw)
        .bind(request.refund_completed_at)
        .bind(request.id)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_return_shipment(&self, return_request_id: Uuid) -> CoreResult<Option<ReturnShipment>> {
        let sql = format!(
            "SELECT {} FROM return_shipments WHERE return_request_id = $1 ORDER BY created_at DESC LIMIT 1",
            SHIPMENT_COLUMNS
        );
        let row: Option<ReturnShipmentRow> = sqlx::query_as(&sql)
            .bind(return_request_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        row.map(ReturnShipment::try_from).transpose()
    }

    async fn find_return_shipment_by_tracking(&self, tracking_id: &str) -> CoreResult<Option<ReturnShipment>> {
        let sql = format!(
            "SELECT {} FROM return_shipments WHERE tracking_id = $1 ORDER BY created_at DESC LIMIT 1",
            SHIPMENT_COLUMNS
        );
        let row: Option<ReturnShipmentRow> = sqlx::query_as(&sql)
            .bind(tracking_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        row.map(ReturnShipment::try_from).transpose()
    }

    async fn mirror_return_status(&self, return_request_id: Uuid) -> CoreResult<Option<ReturnStatus>> {
        // FOR SHARE waits out an in-flight request update, so the copied status
        // is the latest committed one.
        let status: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE return_shipments s
            SET status = r.status, updated_at = NOW()
            FROM (SELECT id, status FROM return_requests WHERE id = $1 FOR SHARE) r
            WHERE s.id = (
                SELECT id FROM return_shipments
                WHERE return_request_id = $1
                ORDER BY created_at DESC
                LIMIT 1
            )
            RETURNING s.status
            "#,
        )
        .bind(return_request_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        status
            .map(|s| s.parse().map_err(|e| corrupt("return_shipments.status", e)))
            .transpose()
    }

    async fn set_return_shipment_tracking(
        &self,
        shipment_id: Uuid,
        tracking_id: &str,
        courier_order_id: Option<&str>,
    ) -> CoreResult<()> {
        sqlx::query(
            r#"
            UPDATE return_shipments
            SET tracking_id = $1, courier_order_id = COALESCE($2, courier_order_id), updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(tracking_id)
        .bind(courier_order_id)
        .bind(shipment_id)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn list_unresolved_return_shipments(&self) -> CoreResult<Vec<ReturnShipment>> {
        let sql = format!(
            "SELECT {} FROM return_shipments \
             WHERE tracking_id IS NOT NULL \
               AND status IN ('requested', 'pickup_scheduled', 'awaiting_dropoff', 'in_transit') \
             ORDER BY updated_at",
            SHIPMENT_COLUMNS
        );
        let rows: Vec<ReturnShipmentRow> = sqlx::query_as(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;

        rows.into_iter().map(ReturnShipment::try_from).collect()
    }
}
