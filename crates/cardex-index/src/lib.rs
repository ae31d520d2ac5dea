//! Cardex Index - versioned storage, dependencies and queries
//!
//! The index holds one row per card instance and module of a realm, tagged
//! with the realm version that wrote it. Publishing a version is atomic:
//! readers always hold a complete [`RealmSnapshot`], old or new.
//!
//! On top of a snapshot sit the [`DependencyGraph`] (what needs recomputing
//! when a URL changes) and the [`QueryEngine`] (filter, sort, page).

pub mod deps;
pub mod error;
pub mod query;
pub mod snapshot;
pub mod store;

pub use deps::DependencyGraph;
pub use error::{QueryError, StoreError};
pub use query::{
    CardOptions, CardResult, Direction, Filter, Page, Query, QueryEngine, QueryResult, Sort,
    SnapshotDefinitions,
};
pub use snapshot::RealmSnapshot;
pub use store::{IndexWriter, PublishMode, PublishOptions};
