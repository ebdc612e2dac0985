//! Core functionality for the data exploration engine
//!
//! This crate provides the shared abstractions the data crate and the
//! application build on: the typed event bus, engine settings and logging
//! setup.

pub mod events;
pub mod logging;
pub mod settings;

// Re-export commonly used types
pub use events::{Event, EventBus, EventHandler, Subscription, SubscriptionId, handler_from_fn};
pub use settings::EngineSettings;
