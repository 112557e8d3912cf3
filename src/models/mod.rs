//! Core data models for the image registry.
//!
//! `ImageRecord` is the only persisted entity. The remaining types are the
//! request and response bodies of the `/images` endpoints and serialize
//! naturally as JSON via `serde`.

pub mod image;
