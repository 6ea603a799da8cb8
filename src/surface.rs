//! Platform surfaces.
//!
//! Everything the rendering pipeline draws on implements [`SurfaceBackend`]. The
//! device-context implementation is [`DcSurface`]; [`DcBackend`] picks between it and a
//! direct-rendering surface for a given context.

pub mod backend;
pub mod damage;
pub mod dc;
pub mod direct;
pub mod image;
pub mod provision;

pub use backend::{FlushFlags, SimilarImage, SurfaceBackend, SurfaceId, SurfaceKind};
pub use damage::{Damage, DamageTracker};
pub use dc::{get_device_handle, get_image_adapter, DcSurface, DeviceBuffer, FallbackState, SurfaceContext};
pub use direct::{direct_dc, DcBackend, DirectSurface, DirectSurfaceFactory};
pub use image::ImageSurface;
pub use provision::PixelDescriptor;
