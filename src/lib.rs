//! Image registry: register image metadata, hand out short-lived signed
//! upload/download links, list with simple filters, and delete.
//!
//! The service is a thin façade over two collaborators, a record store and an
//! object store (see [`stores`]). Both are injected into the router state at
//! startup by [`app::build_state`].

pub mod app;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod stores;
