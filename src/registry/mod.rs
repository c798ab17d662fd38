//! Client registry for sentence fan-out
//!
//! The registry maps each consumer's host address to a bounded outbound
//! buffer. The ingestion listener pushes every sentence into every buffer;
//! each delivery worker drains the buffer of its own host.
//!
//! # Architecture
//!
//! ```text
//!                        Arc<ClientRegistry>
//!                   ┌──────────────────────────┐
//!                   │ clients: HashMap<        │
//!                   │   ClientId,              │
//!                   │   Arc<OutboundBuffer>    │
//!                   │ >                        │
//!                   └────────────┬─────────────┘
//!                                │
//!        ┌───────────────────────┼───────────────────────┐
//!        │                       │                       │
//!        ▼                       ▼                       ▼
//!   [Ingestion]             [Delivery]              [Delivery]
//!   recv_from()             buffer.recv()           buffer.recv()
//!        │                       │                       │
//!        └──► registry.broadcast() ──► write_all() ──► TCP
//! ```
//!
//! Buffers exist before any consumer connects once the host has been seen,
//! so a consumer reconnecting from the same host resumes with whatever was
//! buffered while it was away.

pub mod buffer;
pub mod config;
pub mod sentence;
pub mod store;

pub use buffer::{OutboundBuffer, PushOutcome, ReaderGuard};
pub use config::RegistryConfig;
pub use sentence::{ClientId, Sentence};
pub use store::{BroadcastReport, ClientRegistry};
