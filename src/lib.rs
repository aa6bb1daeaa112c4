//! Clinician-facing annotation editor for dental review records: shapes are
//! drawn over per-slot source images, tagged with a clinical condition, and
//! persisted as a structured document plus a rendered composite.

pub mod app;
pub mod editor;
pub mod history;
pub mod loader;
pub mod model;
pub mod render;
pub mod save;
pub mod store;
