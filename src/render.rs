//! Rendering pipelines drawing on surfaces.

pub mod color;
pub mod context;
pub mod pipeline;

/// Rendering pipelines.
pub mod backends {
    /// Cairo rendering pipeline
    #[cfg(feature = "backend_cairo")]
    pub mod cairo;
    pub mod software;
}

pub use color::Color;
pub use context::Context;
pub use pipeline::RenderPipeline;

pub use backends::software::SoftwarePipeline;
#[cfg(feature = "backend_cairo")]
pub use backends::cairo::CairoPipeline;
