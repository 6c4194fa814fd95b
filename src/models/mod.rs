pub mod geometry;
pub mod image;
pub mod job;
pub mod ocr;
pub mod queue;
pub mod vision;
