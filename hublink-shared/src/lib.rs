pub mod models;
pub mod money;
pub mod pii;

pub use models::order::{Item, Order, OrderStatus, SubOrder, SubOrderStatus, TrackingEvent, TrackingSource};
pub use models::returns::{
    ResolutionPreference, ReturnMethod, ReturnRequest, ReturnShipment, ReturnStatus,
};
pub use pii::Masked;
