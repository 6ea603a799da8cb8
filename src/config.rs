use serde::{Deserialize, Serialize};

const DEFAULT_MAX_DAMAGE_RECTS: usize = 64;

/// What to do with a requested buffer width or height that is zero or negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DimensionPolicy {
    /// Silently bump the dimension to 1 pixel
    Clamp,
    /// Fail with `SurfaceError::InvalidArgument`
    Reject,
}

/// Surface configuration. Shared by a surface and every fallback or similar surface derived from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    /// How many damage rectangles are tracked before the tracker gives up and marks everything dirty
    pub max_damage_rects: usize,
    /// Policy for non-positive buffer sizes
    pub dimension_policy: DimensionPolicy,
    /// Drop the fallback after a flush whose damage covered the whole surface
    pub discard_on_full_damage: bool,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            max_damage_rects: DEFAULT_MAX_DAMAGE_RECTS,
            dimension_policy: DimensionPolicy::Clamp,
            discard_on_full_damage: true,
        }
    }
}

impl SurfaceConfig {
    /// Loads a configuration from a JSON document. Missing fields take their default values.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Applies the dimension policy to a requested size.
    pub fn resolve_size(&self, width: i32, height: i32) -> Option<(i32, i32)> {
        match self.dimension_policy {
            DimensionPolicy::Clamp => Some((width.max(1), height.max(1))),
            DimensionPolicy::Reject if width <= 0 || height <= 0 => None,
            DimensionPolicy::Reject => Some((width, height)),
        }
    }
}
