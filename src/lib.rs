pub mod config;
pub mod enrich;
pub mod ingest;
pub mod norms;
pub mod output;
pub mod query;
pub mod session;
pub mod stats;
pub mod store;
pub mod table;
