pub mod chunks;
pub mod connection;
pub mod fingerprints;
pub mod migrations;
pub mod schema;

pub use connection::{DbError, FolderDb, Result, default_vector_dim};
pub use migrations::{CURRENT_SCHEMA_VERSION, MIGRATIONS, Migration, MigrationRecord};
pub use schema::{DEFAULT_VECTOR_DIM, chunks_schema, embeddings_schema, fingerprints_schema};
