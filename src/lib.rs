//! Floor-plan ingestion pipeline
//!
//! A prioritized, retrying job queue shared by an OCR worker and a vision
//! worker, plus the raw-pixel geometry engine (edges, lines, contours,
//! corners, connected components, moments) the vision side is built on.

pub mod app_state;
pub mod config;
pub mod geometry;
pub mod models;
pub mod queue;
pub mod routes;
pub mod services;
pub mod workers;
