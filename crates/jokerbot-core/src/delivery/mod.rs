mod config;
mod http;
mod memory;
mod retry;
mod stream;

pub use config::{RelayConfig, RetryConfig};
pub use http::{classify_status, HttpEventSource, HttpPublisher};
pub use memory::MemoryRelay;
pub use retry::{DeliveryError, Fault, FaultKind, RetryPhase, RetryPolicy, RetryState};
pub use stream::{EventFeed, Publisher, ResilientStream, StreamSource};
