//! # Sync Harness Core
//!
//! Runtime-free logic shared by the sync service: connector settings and
//! job records, the document filtering engine, and the persistence
//! abstraction with an in-memory backend.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem dependencies.
//! Everything here can be exercised synchronously or on any executor.

pub mod filtering;
pub mod models;
pub mod store;
