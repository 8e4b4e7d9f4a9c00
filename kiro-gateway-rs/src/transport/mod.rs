//! Wire-level transport: headers, HTTP client, and event-stream framing.

pub mod framing;
pub mod headers;
pub mod http;
