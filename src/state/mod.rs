//! State management module
//!
//! This module handles all catalog state, including:
//! - Shared data structures (data.rs)
//! - The key-value store contract (store.rs)
//! - The SQLite-backed catalog implementing that contract (library.rs)
//! - Paginated reads over the ordered views (query.rs)
//! - One-vote-per-user writes (vote.rs)

pub mod data;
pub mod library;
pub mod query;
pub mod store;
pub mod vote;
