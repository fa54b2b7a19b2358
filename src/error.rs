/// Failure of a cascade request.
///
/// Filtered classes and undersized regions are not errors; they never leave
/// the orchestrator.
#[derive(Debug)]
pub enum CascadeError {
    /// The primary detector is not loaded. Reported before any image work.
    DetectorUnavailable { detector: String },
    /// Input bytes are not a decodable image.
    Decode { message: String },
    /// A detector signalled an error during inference.
    DetectorInvocation {
        detector: String,
        source: anyhow::Error,
    },
    /// The per-request deadline passed before `detector` could be invoked.
    DeadlineExceeded { detector: String },
}

impl CascadeError {
    /// Stable machine-readable code for logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DetectorUnavailable { .. } => "detector_unavailable",
            Self::Decode { .. } => "decode_error",
            Self::DetectorInvocation { .. } => "detector_invocation_error",
            Self::DeadlineExceeded { .. } => "deadline_exceeded",
        }
    }

    /// Name of the detector involved, if any.
    pub fn detector(&self) -> Option<&str> {
        match self {
            Self::DetectorUnavailable { detector }
            | Self::DetectorInvocation { detector, .. }
            | Self::DeadlineExceeded { detector } => Some(detector),
            Self::Decode { .. } => None,
        }
    }
}

impl std::fmt::Display for CascadeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DetectorUnavailable { detector } => {
                write!(f, "detector '{}' is not available", detector)
            }
            Self::Decode { message } => write!(f, "cannot decode image: {}", message),
            Self::DetectorInvocation { detector, source } => {
                write!(f, "detector '{}' failed: {:#}", detector, source)
            }
            Self::DeadlineExceeded { detector } => {
                write!(f, "deadline exceeded before running detector '{}'", detector)
            }
        }
    }
}

impl std::error::Error for CascadeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::DetectorInvocation { source, .. } => Some(&**source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn invocation_error_names_detector_and_cause() {
        let err = CascadeError::DetectorInvocation {
            detector: "ppe".to_string(),
            source: anyhow!("tensor shape mismatch"),
        };
        assert_eq!(err.detector(), Some("ppe"));
        assert_eq!(err.code(), "detector_invocation_error");
        assert_eq!(err.to_string(), "detector 'ppe' failed: tensor shape mismatch");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn decode_error_has_no_detector() {
        let err = CascadeError::Decode {
            message: "bad magic".to_string(),
        };
        assert_eq!(err.detector(), None);
        assert_eq!(err.to_string(), "cannot decode image: bad magic");
    }
}
