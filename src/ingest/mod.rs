//! Ingestion pipeline: credential pool, watermark, upsert writer and the loop
//! that ties them to the upstream search API.

pub mod credentials;
pub mod ingestor;
pub mod watermark;
pub mod writer;

pub use credentials::CredentialPool;
pub use ingestor::{Ingestor, IngestorConfig, TickOutcome, WatermarkHandle};
pub use watermark::{Watermark, WatermarkPolicy};
pub use writer::{UpsertWriter, WriteStatus, WriterConfig};
