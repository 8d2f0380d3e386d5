//! WAMD Runtime
//!
//! Async engines on top of `wamd-core`: the message pipeline, the history
//! sync engine and the app-state sync engine, plus the local store they
//! project into and the listener dispatch that reports what changed. The
//! transport, media downloads and persistence are injected collaborators.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod appstate;
pub mod builder;
pub mod client;
pub mod events;
pub mod failure;
pub mod history;
pub mod listeners;
pub mod logging;
pub mod pipeline;
pub mod services;
pub mod store;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use appstate::AppStateEngine;
pub use builder::ClientBuilder;
pub use client::Client;
pub use events::Event;
pub use failure::{FailureAction, FailureLocation, FailureReporter, LoggingFailureHandler};
pub use history::HistorySyncEngine;
pub use listeners::{ListenerId, ListenerRegistry};
pub use pipeline::{Attribution, MessagePipeline};
pub use services::{
    FailureHandler, Listener, MediaDownloader, MediaReference, NoMediaDownloader, RuntimeServices, Transport,
};
pub use store::{Chat, Contact, MessageRecord, Store};

/// Re-export of the protocol core
pub use wamd_core as core;
