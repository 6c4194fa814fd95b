//! Stateless computer-vision primitives over `GrayImage` buffers and point sets.
//!
//! Everything here is synchronous and CPU-bound; callers on the async runtime
//! run it through `tokio::task::spawn_blocking`.

pub mod buffer;
pub mod components;
pub mod contours;
pub mod corners;
pub mod edges;
pub mod lines;
pub mod moments;
pub mod morphology;
pub mod polygon;

pub use components::{label_components, Component, Connectivity, LabelMap};
pub use contours::{detect_contours, ContourDetection, ContourSettings, Foreground};
pub use corners::{detect_corners, Corner, CornerSettings};
pub use edges::{detect_edges, EdgeMap, EdgeSettings, EdgeSummary};
pub use lines::{detect_lines, LineDetection, LineSettings};
pub use moments::{image_moments, polygon_moments, Moments};
