//! MedRoute worker: NEMT route optimisation and live re-routing core.
//!
//! The external HTTP/WebSocket layer consumes this crate through three
//! contracts: [`services::pipeline::Optimizer`] for synchronous optimisation,
//! [`live::manager::SessionManager`] for driver channels, and
//! [`services::health`] for the probe. Everything else is internal.

pub mod config;
pub mod defaults;
pub mod error;
pub mod handlers;
pub mod live;
pub mod services;
pub mod state;
pub mod types;
