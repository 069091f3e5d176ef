//! HTTP front door for the offline media layer.
//!
//! Every request that is not one of the proxy's own `/__worker`, `/__media`
//! or `/__daily` routes is handed to the request interceptor, which answers
//! from its caches or forwards to the upstream application.

pub mod api;
pub mod handlers;
pub mod mapping;
pub mod network;
pub mod routes;
pub mod state;

pub use routes::build_router;
pub use state::{AppState, Backends};
