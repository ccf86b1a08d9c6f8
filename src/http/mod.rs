//! HTTP protocol implementation.
//!
//! A small HTTP/1.1 server with keep-alive connections and streamed,
//! chunk-encoded response bodies.
//!
//! # Architecture
//!
//! - **`connection`**: The per-client request-response state machine
//! - **`parser`**: Parses incoming HTTP requests from byte buffers
//! - **`request`**: HTTP request representation and accessors
//! - **`response`**: HTTP response representation with builder pattern
//! - **`writer`**: Serializes responses, framing streamed bodies as chunks
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← Wait for incoming request data
//!        └──────┬──────┘
//!               │ Request received (malformed → 400, then Closed)
//!               ▼
//!        ┌──────────────────┐
//!        │   Processing     │ ← Forward upstream, build response
//!        └──────┬───────────┘
//!               │ Response head ready
//!               ▼
//!        ┌──────────────────┐
//!        │    Writing       │ ← Send head, then body as it arrives
//!        └──────┬───────────┘
//!               │ Response sent
//!               ├─ Keep-Alive and body complete → Reading
//!               └─ Close or truncated body → Closed
//! ```

pub mod connection;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
