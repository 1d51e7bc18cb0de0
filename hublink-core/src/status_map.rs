//! The one courier-status table. Webhooks and the reconciliation sync both
//! go through here. Bump `STATUS_MAP_VERSION` when entries change.

use hublink_shared::{ReturnStatus, SubOrderStatus};

pub const STATUS_MAP_VERSION: u32 = 1;

const STATUS_TABLE: &[(&str, SubOrderStatus)] = &[
    ("pending pick-up", SubOrderStatus::Assigned),
    ("pending pickup", SubOrderStatus::Assigned),
    ("pending", SubOrderStatus::Assigned),
    ("created", SubOrderStatus::Assigned),
    ("assigned", SubOrderStatus::Assigned),
    ("picked-up", SubOrderStatus::InTransit),
    ("picked up", SubOrderStatus::InTransit),
    ("dispatched", SubOrderStatus::InTransit),
    ("in transit", SubOrderStatus::InTransit),
    ("enroute to last mile hub", SubOrderStatus::InTransit),
    ("at hub", SubOrderStatus::InTransit),
    ("out for delivery", SubOrderStatus::OutForDelivery),
    ("delivered", SubOrderStatus::Delivered),
    ("cancelled", SubOrderStatus::Cancelled),
    ("canceled", SubOrderStatus::Cancelled),
    ("returned", SubOrderStatus::Returned),
    ("returned to sender", SubOrderStatus::Returned),
];

fn normalize(provider_status: &str) -> String {
    provider_status
        .replace('_', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Unmapped statuses become `Processing` instead of failing the update.
pub fn map_courier_status(provider_status: &str) -> SubOrderStatus {
    let key = normalize(provider_status);

    STATUS_TABLE
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, status)| *status)
        .unwrap_or(SubOrderStatus::Processing)
}

/// Where a courier status moves a return shipment, if anywhere.
pub fn return_status_for(status: SubOrderStatus) -> Option<ReturnStatus> {
    match status {
        SubOrderStatus::InTransit | SubOrderStatus::OutForDelivery => Some(ReturnStatus::InTransit),
        SubOrderStatus::Delivered => Some(ReturnStatus::DeliveredToHub),
        SubOrderStatus::Cancelled | SubOrderStatus::Returned => Some(ReturnStatus::Cancelled),
        SubOrderStatus::Pending | SubOrderStatus::Assigned | SubOrderStatus::Processing => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_maps_provider_vocabulary() {
        assert_eq!(map_courier_status("Pending Pick-Up"), SubOrderStatus::Assigned);
        assert_eq!(map_courier_status("Picked-Up"), SubOrderStatus::InTransit);
        assert_eq!(map_courier_status("  Enroute  To Last Mile Hub"), SubOrderStatus::InTransit);
        assert_eq!(map_courier_status("OUT_FOR_DELIVERY"), SubOrderStatus::OutForDelivery);
        assert_eq!(map_courier_status("Delivered"), SubOrderStatus::Delivered);
        assert_eq!(map_courier_status("Canceled"), SubOrderStatus::Cancelled);
        assert_eq!(map_courier_status("Returned To Sender"), SubOrderStatus::Returned);
    }

    #[test]
    fn test_unknown_status_is_processing() {
        assert_eq!(map_courier_status("Awaiting customs"), SubOrderStatus::Processing);
        assert_eq!(map_courier_status(""), SubOrderStatus::Processing);
    }

    #[test]
    fn test_return_mapping() {
        assert_eq!(return_status_for(SubOrderStatus::Delivered), Some(ReturnStatus::DeliveredToHub));
        assert_eq!(return_status_for(SubOrderStatus::OutForDelivery), Some(ReturnStatus::InTransit));
        assert_eq!(return_status_for(SubOrderStatus::Processing), None);
    }
}
