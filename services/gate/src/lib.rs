//! Porter Gate
//!
//! Rate-limiting event gate for the Porter door automation platform. The
//! service accepts detection events over HTTP, claims a per-command slot in
//! a DynamoDB-backed rate table with a single atomic conditional write, and
//! forwards allowed events downstream with exactly one POST. Denied events
//! are dropped for their window; there is no retry or replay anywhere.
//!
//! ## Architecture
//!
//! ```text
//! Detection Events            Rate Table                 Downstream
//! ┌──────────────┐           ┌──────────────┐          ┌──────────────┐
//! │ POST /events │──────────▶│ name ->      │          │ relay        │
//! └──────────────┘           │  selector    │          │ (HTTP POST)  │
//!        │                   │  timestamp   │          └──────────────┘
//!        ▼                   └──────────────┘                 ▲
//! ┌──────────────┐                  │                         │
//! │ Rate Gate    │◀─────────────────┘                         │
//! │ (claim)      │────────── allowed events ──────────────────┘
//! └──────────────┘
//! ```
//!
//! The claim primitive and the event model are exported for the relay
//! service, which gates its door trigger against the same table.

pub mod config;
pub mod event;
pub mod forward;
pub mod handlers;
pub mod rate_gate;

pub use config::{Config, TableConfig};
pub use event::{Command, Event, EventError};
pub use forward::{EventForwarder, ForwardError, HttpForwarder};
pub use handlers::{start_api_server, AppState};
pub use rate_gate::{ClaimStore, DynamoClaimStore, RateGate, RateRecord, StoreError};
