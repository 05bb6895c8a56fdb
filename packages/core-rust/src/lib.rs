//! Provenance Core — actors, scope tokens, the audit record contract, and request field extraction.

pub mod config;
pub mod context;
pub mod record;
pub mod request;
pub mod types;

pub use config::ExtractConfig;
pub use context::{ProvenanceContext, Token};
pub use record::{AuditRecord, LogAction, LogEntry};
pub use request::{InboundRequest, PlainRequest, RequestInfo};
pub use types::{Actor, Identity};
