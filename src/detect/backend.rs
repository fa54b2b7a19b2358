use anyhow::Result;

use crate::detect::result::RawDetection;
use crate::frame::Frame;

/// Object detector capability.
///
/// Implementations must be callable concurrently through `&self`: the
/// registry is shared between requests without locking, and secondary
/// detectors may run on parallel threads over the same crop.
///
/// Boxes returned by `detect` are in the pixel frame of the `Frame` passed in.
/// A backend that rescales internally must map its output back before
/// returning.
pub trait Detector: Send + Sync {
    /// Backend identifier (for logs and service metadata).
    fn backend(&self) -> &'static str;

    /// Run detection. Output order is the backend's native order and is preserved downstream.
    fn detect(&self, frame: &Frame) -> Result<Vec<RawDetection>>;

    /// The backend's own label for a class id.
    fn native_label(&self, class_id: u32) -> String;

    /// Optional warm-up hook, called once after loading.
    fn warm_up(&self) -> Result<()> {
        Ok(())
    }
}
