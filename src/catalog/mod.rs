//! Catalog: Holding/Transaction/File/Location/Aggregation/Quota data
//! model, its permission rules, path-query matching, and the `sqlx`-backed
//! store that implements spec §4.5's bus-exposed operations.

pub mod matching;
pub mod models;
pub mod permissions;
pub mod store;

pub use matching::PathQuery;
pub use models::{Aggregation, CatalogFile, Holding, Location, Quota, StorageType, Transaction};
pub use store::CatalogStore;
