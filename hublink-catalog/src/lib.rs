pub mod reference;
pub mod rates;

pub use reference::{Catalog, CatalogError, Courier, Hub, ShippingRate, Zone, ZoneMatch};
pub use rates::{RateCard, ShippingQuote};
