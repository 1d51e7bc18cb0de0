use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use hublink_catalog::{Catalog, CatalogError, Courier, Hub, RateCard, ShippingQuote};
use hublink_core::courier::QuoteRequest;
use hublink_core::{CoreError, CourierAdapter};
use hublink_shared::money::round_money;
use hublink_shared::Item;
use hublink_store::AllocationPolicy;

#[derive(Debug, Clone)]
pub struct SplitSettings {
    /// Hub used for items that don't name one.
    pub default_hub_id: Option<Uuid>,
    pub allocation_policy: AllocationPolicy,
    /// Used when the zone has no rate row for the hub.
    pub fallback_rate: RateCard,
    pub default_delivery_timeline: String,
    pub quote_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SplitRequest {
    pub items: Vec<Item>,
    pub destination_state: String,
    pub destination_city: String,
    pub customer_paid_shipping: Decimal,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CostSource {
    LiveQuote,
    RateTable,
    FallbackRate,
}

impl CostSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CostSource::LiveQuote => "live_quote",
            CostSource::RateTable => "rate_table",
            CostSource::FallbackRate => "fallback_rate",
        }
    }
}

/// One hub's share of an order.
#[derive(Debug, Clone, Serialize)]
pub struct HubShipment {
    pub hub_id: Uuid,
    pub courier_id: Uuid,
    pub zone_id: Uuid,
    pub items: Vec<Item>,
    pub total_weight: Decimal,
    pub items_total: Decimal,
    pub real_cost: ShippingQuote,
    pub cost_source: CostSource,
    pub allocated_fee: Decimal,
    pub profit_loss: Decimal,
    pub delivery_timeline: String,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SplitError {
    #[error("No fulfillable items: no line item maps to an active hub with a courier")]
    NoFulfillableItems,
    #[error("No shipping zone configured")]
    NoZoneConfigured,
}

impl From<CatalogError> for SplitError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::NoZoneConfigured => SplitError::NoZoneConfigured,
        }
    }
}

impl From<SplitError> for CoreError {
    fn from(err: SplitError) -> Self {
        CoreError::ValidationError(err.to_string())
    }
}

struct HubGroup<'a> {
    hub: &'a Hub,
    items: Vec<Item>,
}

pub struct HubSplitter {
    courier: Arc<dyn CourierAdapter>,
    settings: SplitSettings,
}

impl HubSplitter {
    pub fn new(courier: Arc<dyn CourierAdapter>, settings: SplitSettings) -> Self {
        Self { courier, settings }
    }

    pub fn settings(&self) -> &SplitSettings {
        &self.settings
    }

    pub async fn split(&self, catalog: &Catalog, request: &SplitRequest) -> Result<Vec<HubShipment>, SplitError> {
        let groups = self.group_by_hub(catalog, &request.items);
        if groups.is_empty() {
            return Err(SplitError::NoFulfillableItems);
        }

        let zone_match = catalog.resolve_zone(&request.destination_state)?;
        if zone_match.fallback {
            warn!(
                state = %request.destination_state,
                zone = %zone_match.zone.name,
                "No zone lists the destination state, using the first zone"
            );
        }
        let zone = zone_match.zone;

        let mut priced = Vec::with_capacity(groups.len());
        for group in groups {
            let rate = catalog.rate_for(group.hub.id, zone.id);
            let Some(courier) = catalog.courier_for(group.hub, rate) else {
                warn!(hub = %group.hub.name, zone = %zone.name, "No courier assignable for hub, dropping its items");
                continue;
            };

            let total_weight: Decimal = group.items.iter().map(Item::line_weight).sum();
            let items_total: Decimal = group.items.iter().map(Item::line_total).sum();

            let card = rate
                .map(|r| (r.rate_card(), CostSource::RateTable))
                .unwrap_or_else(|| (self.settings.fallback_rate.clone(), CostSource::FallbackRate));
            let (real_cost, cost_source) = self
                .real_cost(courier, group.hub, request, total_weight, card)
                .await;

            let delivery_timeline = rate
                .and_then(|r| r.delivery_timeline.clone())
                .unwrap_or_else(|| self.settings.default_delivery_timeline.clone());

            debug!(
                hub = %group.hub.name,
                %total_weight,
                real_cost = %real_cost.total,
                source = cost_source.as_str(),
                "Priced hub group"
            );

            priced.push(HubShipment {
                hub_id: group.hub.id,
                courier_id: courier.id,
                zone_id: zone.id,
                items: group.items,
                total_weight,
                items_total,
                real_cost,
                cost_source,
                allocated_fee: Decimal::ZERO,
                profit_loss: Decimal::ZERO,
                delivery_timeline,
            });
        }

        if priced.is_empty() {
            return Err(SplitError::NoFulfillableItems);
        }

        let costs: Vec<Decimal> = priced.iter().map(|s| s.real_cost.total).collect();
        let shares = allocate(request.customer_paid_shipping, &costs, self.settings.allocation_policy);
        for (shipment, share) in priced.iter_mut().zip(shares) {
            shipment.allocated_fee = share;
            shipment.profit_loss = share - shipment.real_cost.total;
        }

        info!(
            hubs = priced.len(),
            zone = %zone.name,
            policy = ?self.settings.allocation_policy,
            "Order split across hubs"
        );
        Ok(priced)
    }

    /// Groups in order of first appearance. Items whose hub is unknown or
    /// inactive are skipped.
    fn group_by_hub<'a>(&self, catalog: &'a Catalog, items: &[Item]) -> Vec<HubGroup<'a>> {
        let mut groups: Vec<HubGroup<'a>> = Vec::new();

        for item in items {
            let Some(hub_id) = item.hub_id.or(self.settings.default_hub_id) else {
                warn!(item = %item.name, "Item has no hub and no default hub is configured");
                continue;
            };
            let Some(hub) = catalog.hub(hub_id).filter(|h| h.is_active) else {
                warn!(item = %item.name, %hub_id, "Item references an unknown or inactive hub");
                continue;
            };

            let mut snapshot = item.clone();
            snapshot.hub_id = Some(hub.id);

            match groups.iter_mut().find(|g| g.hub.id == hub.id) {
                Some(group) => group.items.push(snapshot),
                None => groups.push(HubGroup { hub, items: vec![snapshot] }),
            }
        }

        groups
    }

    /// Live quote under a deadline, else the rate card. Never fails.
    async fn real_cost(
        &self,
        courier: &Courier,
        hub: &Hub,
        request: &SplitRequest,
        total_weight: Decimal,
        (card, card_source): (RateCard, CostSource),
    ) -> (ShippingQuote, CostSource) {
        if courier.supports_live_quotes {
            let quote_request = QuoteRequest {
                origin_state: hub.state.clone(),
                destination_state: request.destination_state.clone(),
                destination_city: request.destination_city.clone(),
                weight: total_weight,
            };

            match tokio::time::timeout(self.settings.quote_timeout, self.courier.quote(&quote_request)).await {
                Ok(Ok(total)) => return (ShippingQuote::flat(round_money(total)), CostSource::LiveQuote),
                Ok(Err(e)) => warn!(courier = %courier.code, "Live quote failed, using rate table: {}", e),
                Err(_) => warn!(
                    courier = %courier.code,
                    timeout_ms = self.settings.quote_timeout.as_millis() as u64,
                    "Live quote timed out, using rate table"
                ),
            }
        }

        let quote = card.quote(total_weight);
        (
            ShippingQuote {
                cost: round_money(quote.cost),
                vat: round_money(quote.vat),
                total: round_money(quote.total),
            },
            card_source,
        )
    }
}

/// Splits `paid` across groups. Each share is rounded to 2dp and the
/// rounding remainder lands on the last group, so shares always sum to `paid`.
pub fn allocate(paid: Decimal, real_costs: &[Decimal], policy: AllocationPolicy) -> Vec<Decimal> {
    let n = real_costs.len();
    if n == 0 {
        return Vec::new();
    }

    let total_cost: Decimal = real_costs.iter().sum();
    let proportional = policy == AllocationPolicy::Proportional && total_cost > Decimal::ZERO;

    let mut shares: Vec<Decimal> = real_costs
        .iter()
        .map(|cost| {
            if proportional {
                round_money(paid * *cost / total_cost)
            } else {
                round_money(paid / Decimal::from(n as u64))
            }
        })
        .collect();

    let head: Decimal = shares[..n - 1].iter().sum();
    shares[n - 1] = paid - head;
    shares
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockCourierAdapter;
    use crate::test_support::{catalog_fixture, item, CatalogFixture};
    use rust_decimal_macros::dec;

    fn settings(policy: AllocationPolicy) -> SplitSettings {
        SplitSettings {
            default_hub_id: None,
            allocation_policy: policy,
            fallback_rate: RateCard::new(dec!(2500), dec!(0), dec!(500), dec!(7.5)),
            default_delivery_timeline: "3-5 days".to_string(),
            quote_timeout: Duration::from_millis(50),
        }
    }

    fn scenario(fx: &CatalogFixture, paid: Decimal) -> SplitRequest {
        SplitRequest {
            items: vec![
                item("Kettle", 1, dec!(1), dec!(5000), Some(fx.hub_a)),
                item("Blender", 1, dec!(2), dec!(12000), Some(fx.hub_a)),
                item("Mug", 1, dec!(0.5), dec!(1500), Some(fx.hub_b)),
            ],
            destination_state: "Oyo".to_string(),
            destination_city: "Ibadan".to_string(),
            customer_paid_shipping: paid,
        }
    }

    #[tokio::test]
    async fn test_two_hub_scenario_with_fallback_rate() {
        let fx = catalog_fixture();
        let splitter = HubSplitter::new(Arc::new(MockCourierAdapter::new()), settings(AllocationPolicy::Equal));

        let shipments = splitter.split(&fx.catalog, &scenario(&fx, dec!(6000))).await.unwrap();
        assert_eq!(shipments.len(), 2);

        let a = shipments.iter().find(|s| s.hub_id == fx.hub_a).unwrap();
        let b = shipments.iter().find(|s| s.hub_id == fx.hub_b).unwrap();

        assert_eq!(a.total_weight, dec!(3));
        assert_eq!(a.real_cost.total, dec!(4300));
        assert_eq!(a.cost_source, CostSource::FallbackRate);
        assert_eq!(b.real_cost.total, dec!(2687.5));
        assert_eq!(a.allocated_fee, dec!(3000));
        assert_eq!(b.allocated_fee, dec!(3000));
        assert_eq!(a.profit_loss, dec!(-1300));
        assert_eq!(b.profit_loss, dec!(312.5));
        assert_eq!(a.zone_id, fx.south_west);
    }

    #[tokio::test]
    async fn test_weights_and_subtotals_are_preserved() {
        let fx = catalog_fixture();
        let splitter = HubSplitter::new(Arc::new(MockCourierAdapter::new()), settings(AllocationPolicy::Equal));
        let request = scenario(&fx, dec!(6000));

        let shipments = splitter.split(&fx.catalog, &request).await.unwrap();

        let weight: Decimal = shipments.iter().map(|s| s.total_weight).sum();
        let subtotal: Decimal = shipments.iter().map(|s| s.items_total).sum();
        assert_eq!(weight, request.items.iter().map(Item::line_weight).sum::<Decimal>());
        assert_eq!(subtotal, dec!(18500));
    }

    #[tokio::test]
    async fn test_live_quote_is_used_when_available() {
        let mut fx = catalog_fixture();
        fx.catalog.couriers[0].supports_live_quotes = true;
        let courier = MockCourierAdapter::new().with_quote(dec!(3100));
        let splitter = HubSplitter::new(Arc::new(courier), settings(AllocationPolicy::Equal));

        let shipments = splitter.split(&fx.catalog, &scenario(&fx, dec!(6000))).await.unwrap();
        assert!(shipments.iter().all(|s| s.cost_source == CostSource::LiveQuote));
        assert!(shipments.iter().all(|s| s.real_cost.total == dec!(3100)));
    }

    #[tokio::test]
    async fn test_quote_failure_and_timeout_fall_back_to_rates() {
        let mut fx = catalog_fixture();
        fx.catalog.couriers[0].supports_live_quotes = true;

        let failing = HubSplitter::new(Arc::new(MockCourierAdapter::new()), settings(AllocationPolicy::Equal));
        let shipments = failing.split(&fx.catalog, &scenario(&fx, dec!(6000))).await.unwrap();
        assert!(shipments.iter().all(|s| s.cost_source == CostSource::FallbackRate));

        let slow = MockCourierAdapter::new()
            .with_quote(dec!(1))
            .with_quote_delay(Duration::from_millis(500));
        let slow = HubSplitter::new(Arc::new(slow), settings(AllocationPolicy::Equal));
        let shipments = slow.split(&fx.catalog, &scenario(&fx, dec!(6000))).await.unwrap();
        assert_eq!(shipments[0].real_cost.total, dec!(4300));
    }

    #[tokio::test]
    async fn test_rate_table_row_wins_over_fallback() {
        let mut fx = catalog_fixture();
        fx.add_rate(fx.hub_b, dec!(1000), dec!(1), dec!(200), dec!(0), Some("1-2 days"));
        let splitter = HubSplitter::new(Arc::new(MockCourierAdapter::new()), settings(AllocationPolicy::Equal));

        let shipments = splitter.split(&fx.catalog, &scenario(&fx, dec!(6000))).await.unwrap();
        let b = shipments.iter().find(|s| s.hub_id == fx.hub_b).unwrap();
        assert_eq!(b.cost_source, CostSource::RateTable);
        assert_eq!(b.real_cost.total, dec!(1000));
        assert_eq!(b.delivery_timeline, "1-2 days");
    }

    #[tokio::test]
    async fn test_hub_without_courier_is_dropped() {
        let mut fx = catalog_fixture();
        fx.catalog.hubs.iter_mut().find(|h| h.id == fx.hub_b).unwrap().default_courier_id = None;
        let splitter = HubSplitter::new(Arc::new(MockCourierAdapter::new()), settings(AllocationPolicy::Equal));

        let shipments = splitter.split(&fx.catalog, &scenario(&fx, dec!(6000))).await.unwrap();
        assert_eq!(shipments.len(), 1);
        assert_eq!(shipments[0].hub_id, fx.hub_a);
        assert_eq!(shipments[0].allocated_fee, dec!(6000));
    }

    #[tokio::test]
    async fn test_no_hub_and_no_zone_errors() {
        let fx = catalog_fixture();
        let splitter = HubSplitter::new(Arc::new(MockCourierAdapter::new()), settings(AllocationPolicy::Equal));

        let mut request = scenario(&fx, dec!(10));
        for item in request.items.iter_mut() {
            item.hub_id = None;
        }
        assert_eq!(
            splitter.split(&fx.catalog, &request).await.unwrap_err(),
            SplitError::NoFulfillableItems
        );

        let mut empty_zones = fx.catalog.clone();
        empty_zones.zones.clear();
        assert_eq!(
            splitter.split(&empty_zones, &scenario(&fx, dec!(10))).await.unwrap_err(),
            SplitError::NoZoneConfigured
        );
    }

    #[tokio::test]
    async fn test_default_hub_and_unknown_state() {
        let fx = catalog_fixture();
        let mut cfg = settings(AllocationPolicy::Equal);
        cfg.default_hub_id = Some(fx.hub_b);
        let splitter = HubSplitter::new(Arc::new(MockCourierAdapter::new()), cfg);

        let request = SplitRequest {
            items: vec![item("Scarf", 2, dec!(0.2), dec!(800), None)],
            destination_state: "Atlantis".to_string(),
            destination_city: "Nowhere".to_string(),
            customer_paid_shipping: dec!(1500),
        };

        let shipments = splitter.split(&fx.catalog, &request).await.unwrap();
        assert_eq!(shipments.len(), 1);
        assert_eq!(shipments[0].hub_id, fx.hub_b);
        assert_eq!(shipments[0].items[0].hub_id, Some(fx.hub_b));
        // First zone in catalog order.
        assert_eq!(shipments[0].zone_id, fx.south_west);
    }

    #[test]
    fn test_allocate_equal_puts_remainder_on_last() {
        let shares = allocate(dec!(100), &[dec!(1), dec!(1), dec!(1)], AllocationPolicy::Equal);
        assert_eq!(shares, vec![dec!(33.33), dec!(33.33), dec!(33.34)]);
        assert_eq!(shares.iter().sum::<Decimal>(), dec!(100));
    }

    #[test]
    fn test_allocate_proportional() {
        let shares = allocate(dec!(6000), &[dec!(4300), dec!(2687.5)], AllocationPolicy::Proportional);
        assert_eq!(shares[0], dec!(3692.31));
        assert_eq!(shares[1], dec!(2307.69));
        assert_eq!(shares.iter().sum::<Decimal>(), dec!(6000));

        // Zero cost everywhere degrades to equal.
        let shares = allocate(dec!(10), &[dec!(0), dec!(0)], AllocationPolicy::Proportional);
        assert_eq!(shares, vec![dec!(5), dec!(5)]);
    }
}
