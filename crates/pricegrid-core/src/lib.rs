//! # pricegrid core
//!
//! Shared, runtime-agnostic logic for pricegrid: data models, label
//! classification, combination generation, the storage abstraction, and
//! the price-preserving reconciliation algorithm.
//!
//! This crate contains no tokio, sqlx, network, or filesystem
//! dependencies. Persistence is reached only through the [`store::Store`]
//! trait, so the same reconciliation code runs against SQLite in the
//! binary and against [`store::memory::InMemoryStore`] in tests.

pub mod classify;
pub mod combine;
pub mod error;
pub mod models;
pub mod reconcile;
pub mod store;
