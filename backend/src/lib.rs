//! videoscan - resource-aware media scan and ingestion engine
//!
//! Discovers video files under the configured roots, extracts metadata and
//! thumbnails with adaptive throttling, and replaces the SQLite catalog in one
//! transaction per scan. Progress is streamed to subscribers as NDJSON.

pub mod api;
pub mod app;
pub mod config;
pub mod db;
pub mod jobs;
pub mod services;

pub use app::{AppState, build_app};
