//! Block model and datasource contract shared across the Ergs workspace.

mod block;
mod datasource;
pub mod time;

pub use block::{Block, BlockView, Metadata};
pub use datasource::{BlockPrototypeFactory, DataSource, DataSourceError, PassthroughFactory};
