/// Sizzle Content Library
///
/// Core of the Sizzle recipe-sharing app: session handling, recipe posts with
/// media, the tag-filtered feed and per-post comment threads. Screens and
/// other front ends drive these components; the relational store, object
/// store and identity provider are reached through collaborator traits.
///
/// # Modules
///
/// - `auth`: Identity provider seam and the current-session manager
/// - `db`: Relational store seam, Postgres adapter and the content repository
/// - `media`: Object store seam and media uploads
/// - `services`: Post composer saga, feed aggregator, comment threads
/// - `models`: Typed rows
/// - `validators`: Input shape checks
/// - `error`: Error types and handling
/// - `config`: Configuration management
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod media;
pub mod models;
pub mod services;
pub mod validators;

pub use config::Config;
pub use error::{ContentError, ErrorKind, Result};
