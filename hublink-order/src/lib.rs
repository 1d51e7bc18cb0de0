pub mod commerce;
pub mod ingest;
pub mod mocks;
pub mod returns;
pub mod shipment;
pub mod splitter;
pub mod sync;

#[cfg(test)]
mod test_support;

pub use commerce::{CommerceOrderPayload, NormalizedOrder};
pub use ingest::{IngestOutcome, IngestionGateway};
pub use mocks::{MockCourierAdapter, MockRefundConnector};
pub use returns::{CreateReturn, InspectionDecision, ReturnService, ReturnSettings, ReturnUpdateOutcome};
pub use shipment::{DispatchOutcome, ShipmentService, UpdateOutcome};
pub use splitter::{CostSource, HubShipment, HubSplitter, SplitError, SplitRequest, SplitSettings};
pub use sync::{ReconciliationSync, SyncReport};
