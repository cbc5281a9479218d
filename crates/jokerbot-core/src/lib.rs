#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::option_if_let_else)]

pub mod catalog;
pub mod delivery;
pub mod error;
pub mod extract;
pub mod format;
pub mod pipeline;
pub mod record;

pub use catalog::{
    CacheStats, CatalogCache, CatalogStore, CsvImporter, ImportReport, MemoryCatalogStore,
    NameListPolicy, SqliteCatalogStore, StoreError,
};
pub use delivery::{
    DeliveryError, Fault, FaultKind, HttpEventSource, HttpPublisher, RelayConfig,
    ResilientStream, RetryConfig, RetryPolicy,
};
pub use error::{Error, Result};
pub use extract::{should_process, EventGate, Extractor, ExtractorConfig, MatchSet};
pub use format::{FormattedReply, ReplyFormatter};
pub use pipeline::{EventOutcome, Pipeline, PipelineConfig, PipelineStats, SkipReason};
pub use record::{normalize_name, EntityRecord, InboundEvent, ValidationError};
