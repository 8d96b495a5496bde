//! Data collaborators: remote provider, Parquet cache.
//!
//! Nothing in here is used by the engine itself. The runner decides where
//! bars come from and hands the engine a finished [`Series`](crate::domain::Series).

pub mod cache;
pub mod polygon;
pub mod provider;

pub use cache::{CacheMeta, ParquetCache};
pub use polygon::{PolygonCredentials, PolygonProvider, TickerDetails};
pub use provider::{DataError, DataProvider, DataSource, FetchResult};
