//! Pipeline actors: processor, router, endpoints.
//!
//! ```text
//! processor ──► router ──► endpoint("ws") ──► WebSocketServer
//!                     └──► endpoint("udp") ─► UdpSink
//! ```

pub mod endpoint;
pub mod processor;
pub mod router;

pub use endpoint::Endpoint;
pub use processor::Processor;
pub use router::Router;
