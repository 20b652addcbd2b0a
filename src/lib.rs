//! Headless client for side-by-side LLM comparison sessions.
//!
//! A session binds a fixed set of models on the backend; each prompt fans
//! out to all of them and their responses stream back over one WebSocket.
//! [`playground::Playground`] drives a round, [`store::SessionStore`] holds
//! the per-model state, and [`history::HistoryReconciler`] keeps finished
//! comparisons in step with the backend.

pub mod api;
pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod history;
pub mod lifecycle;
pub mod logging;
pub mod models;
pub mod playground;
pub mod protocol;
pub mod store;
pub mod streaming;
pub mod transport;
pub mod ui;

pub use error::{ArenaError, ErrorKind, Result};
