//! HTTP route definitions
//!
//! Health probes live at the root; everything else is nested under /api.

pub mod health;
pub mod scan;
