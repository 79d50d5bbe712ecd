//! Synchronous client core for the GLPI REST API.
//!
//! # Overview
//! Builds `HttpRequest` values and parses `HttpResponse` values without
//! touching the network (host-does-IO pattern). The gateway executes the
//! actual HTTP round-trip, which keeps this crate deterministic and testable.
//!
//! # Design
//! - `GlpiClient` is stateless: it holds the base URL and the application
//!   token. Session tokens are passed to every authenticated `build_*` call.
//! - Remote items are opaque `Document`s; only GLPI's envelopes are typed.
//! - Not-found detection uses the HTTP status and GLPI's error code, never
//!   the human-readable message.

pub mod client;
pub mod error;
pub mod http;
pub mod types;

pub use client::{check_itemtype, GlpiClient};
pub use error::ApiError;
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use types::{
    Created, CreatedItem, Criterion, Document, ItemInput, ItemOptions, ItemOutcome, Outcomes,
    Pagination, SearchQuery, SessionToken, Sort, SortOrder, DEFAULT_LIMIT,
};
