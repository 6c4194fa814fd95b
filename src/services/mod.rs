pub mod cache;
pub mod image_loader;
pub mod lifecycle;
pub mod object_detector;
pub mod ocr;
pub mod preprocess;
pub mod room_detector;
pub mod temp;
pub mod text_parser;

pub use cache::{CacheError, MemoryCache, RedisCache, ResultCache};
pub use image_loader::{ImageLimits, ImageLoader, LoadedImage};
pub use lifecycle::{Lifecycle, ManagedEngine};
pub use object_detector::{BlobObjectDetector, ObjectDetector};
pub use ocr::{OcrEngine, WorkersAiOcrEngine};
pub use preprocess::{ContrastPreprocessor, Preprocessor};
pub use room_detector::{GeometryRoomDetector, RoomDetector};
pub use temp::{sweep_job_workspaces, TempWorkspace};
pub use text_parser::{FloorPlanTextParser, TextParser};
