//! Durable storage for contacts, conversations, messages and files.
//!
//! A single SQLite connection, owned by the reactor and used under its
//! single-threaded discipline. Every public mutation is one statement or
//! one transaction, so the store never observes half-applied state. Tests
//! run against the in-memory mode.

mod database;
mod schema;

pub use database::Database;

/// Default database filename.
pub const DEFAULT_DB_NAME: &str = "duskwire.db";
