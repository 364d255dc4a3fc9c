//! Scroll-driven feeds
//!
//! - The incremental-fetch state machine (scroll.rs)
//! - Timeline, top-voted and favorites controllers (controllers.rs)

pub mod controllers;
pub mod scroll;
