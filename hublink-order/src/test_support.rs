//! Fixtures shared by the service tests.

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use hublink_catalog::{Catalog, Courier, Hub, RateCard, ShippingRate, Zone};
use hublink_shared::Item;
use hublink_store::{AllocationPolicy, LocalLocks, MemoryStore, RecordingPublisher};

use crate::commerce::{Address, CommerceOrderPayload, LineItem, MetaData};
use crate::ingest::IngestionGateway;
use crate::mocks::{MockCourierAdapter, MockRefundConnector};
use crate::returns::{ReturnService, ReturnSettings};
use crate::shipment::ShipmentService;
use crate::splitter::{HubSplitter, SplitSettings};
use crate::sync::ReconciliationSync;

pub struct CatalogFixture {
    pub catalog: Catalog,
    pub hub_a: Uuid,
    pub hub_b: Uuid,
    pub south_west: Uuid,
}

impl CatalogFixture {
    pub fn add_rate(
        &mut self,
        hub: Uuid,
        base: Decimal,
        min_weight: Decimal,
        per_kg: Decimal,
        vat: Decimal,
        timeline: Option<&str>,
    ) {
        let courier_id = self.catalog.couriers[0].id;
        self.catalog.rates.push(ShippingRate {
            id: Uuid::new_v4(),
            zone_id: self.south_west,
            hub_id: Some(hub),
            courier_id,
            base_rate: base,
            min_weight_threshold: min_weight,
            per_kg_rate: per_kg,
            vat_percentage: vat,
            delivery_timeline: timeline.map(str::to_string),
            is_active: true,
        });
    }
}

fn hub(name: &str, city: &str, state: &str, courier: Uuid) -> Hub {
    Hub {
        id: Uuid::new_v4(),
        name: name.to_string(),
        address: format!("1 {} Road", name),
        city: city.to_string(),
        state: state.to_string(),
        phone: Some("08000000000".to_string()),
        default_courier_id: Some(courier),
        is_active: true,
        created_at: Utc::now(),
    }
}

/// Two hubs sharing one courier, two zones, no rate rows.
pub fn catalog_fixture() -> CatalogFixture {
    let courier = Courier {
        id: Uuid::new_v4(),
        name: "Test Logistics".to_string(),
        code: "test".to_string(),
        supports_live_quotes: false,
        is_active: true,
    };
    let hub_a = hub("Ikeja", "Ikeja", "Lagos", courier.id);
    let hub_b = hub("Bodija", "Ibadan", "Oyo", courier.id);
    let south_west = Zone {
        id: Uuid::new_v4(),
        name: "South West".to_string(),
        states: vec!["Lagos".to_string(), "Oyo".to_string(), "Ogun".to_string()],
        position: 1,
    };
    let north = Zone {
        id: Uuid::new_v4(),
        name: "North".to_string(),
        states: vec!["Kano".to_string(), "Kaduna".to_string()],
        position: 2,
    };

    CatalogFixture {
        hub_a: hub_a.id,
        hub_b: hub_b.id,
        south_west: south_west.id,
        catalog: Catalog {
            hubs: vec![hub_a, hub_b],
            couriers: vec![courier],
            zones: vec![south_west, north],
            rates: vec![],
        },
    }
}

pub fn item(name: &str, quantity: u32, weight: Decimal, price: Decimal, hub_id: Option<Uuid>) -> Item {
    Item {
        product_id: None,
        sku: None,
        name: name.to_string(),
        quantity,
        weight,
        price,
        hub_id,
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub courier: Arc<MockCourierAdapter>,
    pub refunds: Arc<MockRefundConnector>,
    pub events: Arc<RecordingPublisher>,
    pub fx: CatalogFixture,
    pub gateway: IngestionGateway,
    pub shipments: Arc<ShipmentService>,
    pub returns: Arc<ReturnService>,
    pub sync: ReconciliationSync,
}

#[derive(Default)]
pub struct HarnessBuilder {
    auto_dispatch: bool,
    failing_refunds: bool,
}

impl HarnessBuilder {
    pub fn auto_dispatch(mut self, on: bool) -> Self {
        self.auto_dispatch = on;
        self
    }

    pub fn failing_refunds(mut self) -> Self {
        self.failing_refunds = true;
        self
    }

    pub fn build(self) -> Harness {
        let fx = catalog_fixture();
        let store = Arc::new(MemoryStore::with_catalog(fx.catalog.clone()));
        let courier = Arc::new(MockCourierAdapter::new());
        let refunds = Arc::new(if self.failing_refunds {
            MockRefundConnector::failing()
        } else {
            MockRefundConnector::new()
        });
        let events = Arc::new(RecordingPublisher::new());
        let locks = Arc::new(LocalLocks::new());

        let splitter = Arc::new(HubSplitter::new(
            courier.clone(),
            SplitSettings {
                default_hub_id: None,
                allocation_policy: AllocationPolicy::Equal,
                fallback_rate: RateCard::new(dec!(2500), dec!(0), dec!(500), dec!(7.5)),
                default_delivery_timeline: "3-5 business days".to_string(),
                quote_timeout: Duration::from_millis(50),
            },
        ));
        let shipments = Arc::new(ShipmentService::new(
            store.clone(),
            store.clone(),
            courier.clone(),
            locks.clone(),
            events.clone(),
            30,
        ));
        let returns = Arc::new(ReturnService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            courier.clone(),
            refunds.clone(),
            locks,
            events.clone(),
            ReturnSettings {
                window_days: 14,
                lock_ttl_seconds: 30,
            },
        ));
        let gateway = IngestionGateway::new(
            store.clone(),
            store.clone(),
            splitter,
            shipments.clone(),
            events.clone(),
            self.auto_dispatch,
        );
        let sync = ReconciliationSync::new(
            store.clone(),
            store.clone(),
            courier.clone(),
            shipments.clone(),
            returns.clone(),
            4,
        );

        Harness {
            store,
            courier,
            refunds,
            events,
            fx,
            gateway,
            shipments,
            returns,
            sync,
        }
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    /// Kettle and blender from hub A, a mug from hub B, shipped to Oyo.
    pub fn payload(&self, external_id: &str) -> CommerceOrderPayload {
        let line = |name: &str, weight: Decimal, price: Decimal, hub: Uuid| LineItem {
            product_id: None,
            sku: None,
            name: name.to_string(),
            quantity: Decimal::ONE,
            price: Some(price),
            total: Some(price),
            weight: Some(weight),
            meta_data: vec![MetaData {
                key: "_hub_id".to_string(),
                value: json!(hub.to_string()),
            }],
        };

        CommerceOrderPayload {
            id: Some(external_id.to_string()),
            customer_id: None,
            status: Some("processing".to_string()),
            date_paid: Some("2026-10-01T10:00:00".to_string()),
            billing: Address {
                first_name: "Ada".to_string(),
                last_name: "Obi".to_string(),
                email: "ada@example.com".to_string(),
                phone: "08031234567".to_string(),
                address_1: "4 Ring Rd".to_string(),
                city: "Ibadan".to_string(),
                state: "Oyo".to_string(),
                ..Address::default()
            },
            shipping: Address {
                address_1: "4 Ring Rd".to_string(),
                city: "Ibadan".to_string(),
                state: "Oyo".to_string(),
                ..Address::default()
            },
            line_items: vec![
                line("Kettle", dec!(1), dec!(5000), self.fx.hub_a),
                line("Blender", dec!(2), dec!(12000), self.fx.hub_a),
                line("Mug", dec!(0.5), dec!(1500), self.fx.hub_b),
            ],
            total: dec!(24500),
            shipping_total: dec!(6000),
        }
    }
}
