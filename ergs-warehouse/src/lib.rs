//! Per-datasource ingestion scheduler (C5), persist-and-fanout pipeline,
//! and the out-of-process event bridge (C6).

mod bridge;
mod error;
mod pipeline;
mod scheduler;

pub use bridge::EventBridge;
pub use error::WarehouseError;
pub use scheduler::Warehouse;
