//! Adaptive learning-content engine.
//!
//! Picks a content mode (quiz, flashcards, interactive lesson) per learner
//! with Thompson Sampling, turns feedback history into generation
//! parameters, and tracks per-chunk answer accuracy. The
//! [`Orchestrator`](orchestrator::Orchestrator) is the entry point.

pub mod config;
pub mod engine;
pub mod logging;
pub mod orchestrator;
pub mod response;
pub mod services;
pub mod store;

pub use config::Config;
pub use orchestrator::{InitError, Orchestrator};
pub use response::{CommandError, CommandResponse};
