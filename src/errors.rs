use crate::format::Format;

#[derive(Debug, thiserror::Error)]
pub enum SurfaceError {
    #[error("Unsupported pixel format: {0:?}")]
    UnsupportedFormat(Format),

    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("Allocation failed")]
    AllocationFailed,

    #[error("{context}: device error")]
    DeviceError { context: String },

    #[error("Surface type mismatch")]
    SurfaceTypeMismatch,

    #[error("Surface is already finished")]
    Finished,

    #[error("Operation not supported by this pipeline")]
    Unsupported,

    #[error("PNG encoding error: {0}")]
    Png(#[from] png::EncodingError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SurfaceError {
    /// Builds a [`SurfaceError::DeviceError`] and logs it with the name of the failing operation.
    pub fn device(context: &str) -> Self {
        log::error!("{}: device error", context);
        SurfaceError::DeviceError {
            context: context.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_error_keeps_context() {
        let err = SurfaceError::device("flush");
        assert_eq!(err.to_string(), "flush: device error");
        assert!(matches!(err, SurfaceError::DeviceError { ref context } if context == "flush"));
    }

    #[test]
    fn unsupported_format_names_the_format() {
        let err = SurfaceError::UnsupportedFormat(Format::A1);
        assert_eq!(err.to_string(), "Unsupported pixel format: A1");
    }
}
