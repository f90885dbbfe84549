// ABOUTME: Schema catalog abstraction over one open database connection
// ABOUTME: Introspection, watermark probes, and the key primitives used for orphan cleanup

pub mod memory;
pub mod mysql;

use anyhow::Result;
use async_trait::async_trait;

use crate::error::Side;
use crate::watermark::Watermark;

pub use memory::{MemoryConnector, MemoryDatabase, MemoryTable};
pub use mysql::{MySqlCatalog, MySqlConnector};

/// Primary key values of one row as raw bytes, in primary key column order.
///
/// Bytes rather than text so `BINARY`/`VARBINARY` keys compare and delete
/// exactly.
pub type KeyTuple = Vec<Vec<u8>>;

/// One open connection to a database, owned by a single table pipeline.
///
/// Table and column names passed in come from the catalog itself or from
/// validated operator input; implementations quote them consistently.
#[async_trait]
pub trait Catalog: Send {
    /// All base tables in the connected schema.
    async fn list_tables(&mut self) -> Result<Vec<String>>;

    async fn table_exists(&mut self, table: &str) -> Result<bool>;

    /// Column names in ordinal order. Empty when the table does not exist.
    async fn columns(&mut self, table: &str) -> Result<Vec<String>>;

    /// Primary key column names in key order. Empty when there is none.
    async fn primary_key(&mut self, table: &str) -> Result<Vec<String>>;

    async fn has_column(&mut self, table: &str, column: &str) -> Result<bool>;

    /// Maximum non-NULL value of `column`, or `None` for an empty table.
    async fn max_value(&mut self, table: &str, column: &str) -> Result<Option<Watermark>>;

    async fn row_count_nonzero(&mut self, table: &str) -> Result<bool>;

    /// Every primary key tuple in the table.
    async fn primary_key_values(
        &mut self,
        table: &str,
        primary_key_columns: &[String],
    ) -> Result<Vec<KeyTuple>>;

    /// Delete the rows with the given keys in a single transaction.
    ///
    /// Returns the number of rows removed.
    async fn delete_by_keys(
        &mut self,
        table: &str,
        primary_key_columns: &[String],
        keys: &[KeyTuple],
    ) -> Result<u64>;

    async fn truncate(&mut self, table: &str) -> Result<()>;

    /// Release the connection.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Opens fresh connections for either side of the mirror.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, side: Side) -> Result<Box<dyn Catalog>>;
}
