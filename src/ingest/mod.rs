pub mod service;

pub use service::{IngestOutcome, IngestService};
