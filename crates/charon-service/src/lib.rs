//! The companion service: a bounded LIFO job queue drained by a fixed worker
//! pool, answering data-extraction requests with streaming per-request
//! events. The bus transport proper stays outside; [`bus`] holds the service
//! identity and the wire model spoken by the binary's stdio adapter.

pub mod bus;
pub mod queue;
pub mod service;
pub mod wire;
