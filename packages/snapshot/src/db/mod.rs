//! Database access for logical export and restore.

pub mod connection;
pub mod error;
pub mod manifest;
pub mod memory;
pub mod postgres;
pub mod repository;
pub mod traits;

pub use connection::ConnectionTarget;
pub use error::{DatabaseError, DatabaseResult};
pub use manifest::{ExportManifest, SCHEMA_VERSION, SkippedCollection};
pub use memory::{ForeignKey, MemoryDatabase, MemoryReadSnapshot, WriteOp};
pub use postgres::{PgDatabase, PgReadSnapshot, quote_ident};
pub use repository::{TableDao, TableRegistry, TableRepository, TableSpec};
pub use traits::{Database, ReadSnapshot, Row, Transaction};
