//! Order-created payload as sent by the commerce backend, and its
//! normalisation into domain values.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use uuid::Uuid;

use hublink_core::CoreError;
use hublink_shared::money::{decimal_from_value, lenient_decimal, lenient_decimal_opt, lenient_string_opt};
use hublink_shared::Item;

const HUB_META_KEYS: &[&str] = &["_hub_id", "hub_id"];
const WEIGHT_META_KEYS: &[&str] = &["_weight", "weight"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommerceOrderPayload {
    #[serde(default, deserialize_with = "lenient_string_opt")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string_opt")]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub date_paid: Option<String>,
    #[serde(default)]
    pub billing: Address,
    #[serde(default)]
    pub shipping: Address,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub total: Decimal,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub shipping_total: Decimal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Address {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub address_1: String,
    #[serde(default)]
    pub address_2: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LineItem {
    #[serde(default, deserialize_with = "lenient_string_opt")]
    pub product_id: Option<String>,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub quantity: Decimal,
    /// Unit price.
    #[serde(default, deserialize_with = "lenient_decimal_opt")]
    pub price: Option<Decimal>,
    /// Line total.
    #[serde(default, deserialize_with = "lenient_decimal_opt")]
    pub total: Option<Decimal>,
    /// Unit weight in kg.
    #[serde(default, deserialize_with = "lenient_decimal_opt")]
    pub weight: Option<Decimal>,
    #[serde(default)]
    pub meta_data: Vec<MetaData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaData {
    pub key: String,
    #[serde(default)]
    pub value: Value,
}

impl LineItem {
    fn meta(&self, keys: &[&str]) -> Option<&Value> {
        self.meta_data
            .iter()
            .find(|m| keys.contains(&m.key.as_str()))
            .map(|m| &m.value)
    }

    pub fn hub_id(&self) -> Option<Uuid> {
        self.meta(HUB_META_KEYS)
            .and_then(Value::as_str)
            .and_then(|s| Uuid::from_str(s.trim()).ok())
    }

    fn unit_weight(&self) -> Decimal {
        self.weight
            .or_else(|| self.meta(WEIGHT_META_KEYS).and_then(decimal_from_value))
            .unwrap_or(Decimal::ZERO)
    }

    fn unit_price(&self) -> Decimal {
        match (self.price, self.total) {
            (Some(price), _) => price,
            (None, Some(total)) if self.quantity > Decimal::ZERO => total / self.quantity,
            _ => Decimal::ZERO,
        }
    }
}

/// Validated order, ready for splitting and persistence.
#[derive(Debug, Clone)]
pub struct NormalizedOrder {
    pub external_id: String,
    pub customer_id: Option<String>,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub shipping_address: String,
    pub shipping_city: String,
    pub shipping_state: String,
    pub items: Vec<Item>,
    pub subtotal: Decimal,
    pub total: Decimal,
    pub shipping_fee_paid: Decimal,
    pub payment_status: String,
}

fn first_non_empty<'a>(a: &'a str, b: &'a str) -> &'a str {
    if a.trim().is_empty() {
        b.trim()
    } else {
        a.trim()
    }
}

impl CommerceOrderPayload {
    /// All missing required fields are reported together.
    pub fn normalize(&self) -> Result<NormalizedOrder, CoreError> {
        let mut missing = Vec::new();

        let external_id = self.id.clone().unwrap_or_default();
        if external_id.is_empty() {
            missing.push("id");
        }

        let customer_name = format!("{} {}", self.billing.first_name.trim(), self.billing.last_name.trim())
            .trim()
            .to_string();
        if customer_name.is_empty() {
            missing.push("billing.name");
        }
        if self.billing.email.trim().is_empty() {
            missing.push("billing.email");
        }

        // Shipping block falls back to billing, as the storefront does when
        // "ship to a different address" is unticked.
        let address = first_non_empty(&self.shipping.address_1, &self.billing.address_1);
        let city = first_non_empty(&self.shipping.city, &self.billing.city);
        let state = first_non_empty(&self.shipping.state, &self.billing.state);
        if address.is_empty() {
            missing.push("shipping.address_1");
        }
        if city.is_empty() {
            missing.push("shipping.city");
        }
        if state.is_empty() {
            missing.push("shipping.state");
        }
        if self.line_items.is_empty() {
            missing.push("line_items");
        }

        if !missing.is_empty() {
            return Err(CoreError::ValidationError(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        }

        let items = self
            .line_items
            .iter()
            .enumerate()
            .map(|(idx, line)| to_item(idx, line))
            .collect::<Result<Vec<_>, _>>()?;

        let subtotal: Decimal = items.iter().map(Item::line_total).sum();
        let total = if self.total > Decimal::ZERO {
            self.total
        } else {
            subtotal + self.shipping_total
        };

        let paid = self.date_paid.as_deref().map(|d| !d.is_empty()).unwrap_or(false)
            || matches!(self.status.as_deref(), Some("processing") | Some("completed"));
        let payment_status = if paid {
            "paid".to_string()
        } else {
            self.status.clone().unwrap_or_else(|| "pending".to_string())
        };

        let phone = first_non_empty(&self.shipping.phone, &self.billing.phone);

        Ok(NormalizedOrder {
            external_id,
            customer_id: self.customer_id.clone().filter(|id| id != "0"),
            customer_name,
            customer_email: self.billing.email.trim().to_string(),
            customer_phone: (!phone.is_empty()).then(|| phone.to_string()),
            shipping_address: address.to_string(),
            shipping_city: city.to_string(),
            shipping_state: state.to_string(),
            items,
            subtotal,
            total,
            shipping_fee_paid: self.shipping_total,
            payment_status,
        })
    }
}

fn to_item(idx: usize, line: &LineItem) -> Result<Item, CoreError> {
    let invalid = |why: &str| CoreError::ValidationError(format!("line_items[{}]: {}", idx, why));

    if line.quantity < Decimal::ONE || !line.quantity.fract().is_zero() {
        return Err(invalid("quantity must be a whole number of at least 1"));
    }
    let quantity: u32 = line
        .quantity
        .to_string()
        .parse()
        .map_err(|_| invalid("quantity out of range"))?;

    let weight = line.unit_weight();
    if weight < Decimal::ZERO {
        return Err(invalid("weight must not be negative"));
    }

    Ok(Item {
        product_id: line.product_id.clone(),
        sku: line.sku.clone().filter(|s| !s.is_empty()),
        name: if line.name.is_empty() {
            format!("item {}", idx + 1)
        } else {
            line.name.clone()
        },
        quantity,
        weight,
        price: line.unit_price(),
        hub_id: line.hub_id(),
    })
}
