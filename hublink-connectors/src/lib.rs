pub mod courier;
pub mod refund;

pub use courier::{CourierSettings, HttpCourierAdapter};
pub use refund::{CommerceSettings, HttpRefundConnector};
