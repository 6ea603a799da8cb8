pub mod config;
pub mod device;
pub mod errors;
pub mod format;
pub mod geometry;
pub mod platform;
pub mod render;
pub mod surface;

pub use config::SurfaceConfig;
pub use errors::SurfaceError;
pub use format::{Content, Format};
pub use geometry::RectInt;
pub use surface::{DcBackend, DcSurface, FlushFlags, ImageSurface, SurfaceBackend, SurfaceContext};
