mod backend;
mod backends;
mod class_map;
mod registry;
mod result;

pub use backend::Detector;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use class_map::{parse_class_map, validate_detector_name, ClassMap, DetectorConfig};
pub use registry::{DetectorRegistry, RegistryBuilder};
pub use result::{CascadeResult, Detection, DetectionKind, Provenance, RawDetection};
