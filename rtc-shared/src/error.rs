#![allow(dead_code)]

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, PartialEq)]
#[non_exhaustive]
pub enum Error {
    //Video coding errors
    #[error("invalid stream index: {0}")]
    ErrInvalidStreamIndex(i32),
    #[error("invalid codec configuration: {0}")]
    ErrInvalidConfiguration(String),
    #[error("encoder rejected: {0}")]
    ErrEncoderRejected(String),
    #[error("no framerate estimate available")]
    ErrNoEstimateAvailable,
    #[error("no send codec registered")]
    ErrCodecNotRegistered,

    //Third Party Error
    #[error("{0}")]
    Std(#[source] StdError),

    //Other Errors
    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn from_std<T>(error: T) -> Self
    where
        T: std::error::Error + Send + Sync + 'static,
    {
        Error::Std(StdError(Box::new(error)))
    }

    pub fn downcast_ref<T: std::error::Error + 'static>(&self) -> Option<&T> {
        if let Error::Std(s) = self {
            return s.0.downcast_ref();
        }

        None
    }
}

/// An escape hatch to preserve the source of errors raised by encoder backends.
///
/// Encoder implementations wrap codec libraries whose error types are foreign
/// to this workspace. `Error::from_std` keeps the underlying error available
/// through [`Error::downcast_ref`].
#[derive(Debug, Error)]
#[error("{0}")]
pub struct StdError(pub Box<dyn std::error::Error + Send + Sync>);

impl PartialEq for StdError {
    fn eq(&self, _: &Self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("vpx: out of memory")]
    struct VpxError;

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::ErrInvalidStreamIndex(-1).to_string(),
            "invalid stream index: -1"
        );
        assert_eq!(
            Error::ErrEncoderRejected("busy".to_owned()).to_string(),
            "encoder rejected: busy"
        );
    }

    #[test]
    fn test_from_std_downcast() {
        let err = Error::from_std(VpxError);
        assert_eq!(err.to_string(), "vpx: out of memory");
        assert!(err.downcast_ref::<VpxError>().is_some());
        assert!(Error::Other("x".to_owned()).downcast_ref::<VpxError>().is_none());
    }

    #[test]
    fn test_std_errors_never_compare_equal() {
        assert_ne!(Error::from_std(VpxError), Error::from_std(VpxError));
        assert_eq!(Error::ErrNoEstimateAvailable, Error::ErrNoEstimateAvailable);
    }
}
