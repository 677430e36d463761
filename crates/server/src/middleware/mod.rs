//! HTTP middleware and extractors.
//!
//! The tracing, Sentry, and shutdown layers are assembled in `main`;
//! this module holds the request-level extractors.

pub mod actor;

pub use actor::Actor;
