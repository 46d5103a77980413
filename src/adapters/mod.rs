//! Transport adapters.
//!
//! Adapters translate protocol requests into resource operations and map
//! [`TrellisError`](crate::core::error::TrellisError) kinds onto protocol
//! responses. They own no coordination logic: retries and leader
//! redirection stay with the caller.
//!
//! - [`rest`] - HTTP-style request/response mapping for atomic values

pub mod rest;
