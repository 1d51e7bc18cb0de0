pub mod app_config;
pub mod catalog_repo;
pub mod database;
#[cfg(feature = "kafka")]
pub mod events;
pub mod memory;
pub mod order_repo;
pub mod redis_repo;
pub mod return_repo;

pub use app_config::{AllocationPolicy, Config};
pub use catalog_repo::StoreCatalogRepository;
pub use database::DbClient;
#[cfg(feature = "kafka")]
pub use events::EventProducer;
pub use memory::{LocalLocks, MemoryStore, RecordingPublisher};
pub use order_repo::StoreOrderRepository;
pub use redis_repo::RedisClient;
pub use return_repo::StoreReturnRepository;
