//! REST gateway in front of GLPI's legacy REST API.
//!
//! # Overview
//! Each inbound request gets its own GLPI session: the router asks a
//! `ClientFactory` for a fresh `RemoteClient`, opens a session, makes exactly
//! one remote call, closes the session and relays GLPI's JSON.
//!
//! | route | GLPI call |
//! |---|---|
//! | `GET /health` | none |
//! | `GET /glpi/test` | `getActiveProfile` |
//! | `GET /glpi/session` | `getFullSession` |
//! | `GET /glpi/config` | `getGlpiConfig` |
//! | `GET /glpi/profiles[/active]` | `getMyProfiles` / `getActiveProfile` |
//! | `GET /glpi/entities[/active]` | `getMyEntities` / `getActiveEntities` |
//! | `GET, POST /glpi/items/{itemtype}` | list / create |
//! | `GET, PUT, DELETE /glpi/items/{itemtype}/{id}` | read / update / delete |
//! | `GET /glpi/items/{itemtype}/{id}/{sub_itemtype}` | sub-items |
//! | `GET /glpi/search/{itemtype}` | search engine |
//!
//! # Design
//! - Request building and response parsing live in `glpi_core`; this crate
//!   adds the transport, the session bracket and the HTTP mapping.
//! - Outbound calls are blocking (ureq) and run on tokio's blocking pool.
//! - Errors map to 404 (not found), 400 (bad input) or 500 (everything else).

pub mod config;
pub mod error;
pub mod query;
pub mod remote;
pub mod routes;
pub mod session;
pub mod transport;

pub use config::{ConfigError, GatewayConfig};
pub use error::GatewayError;
pub use remote::{ClientFactory, GlpiClientFactory, RemoteClient, SessionClient};
pub use routes::app;
pub use session::{with_session, with_session_for};
pub use transport::{Transport, UreqTransport};
