//! Cascade Object Detection
//!
//! Two-stage detection: a primary detector finds regions (people, vehicles,
//! ...), then each configured secondary detector runs on every sufficiently
//! large region crop. Secondary boxes are mapped back into the original image
//! frame and linked to the primary box they were found in.
//!
//! # Module Structure
//!
//! - `geometry`: `BoundingBox`, `Region`, region extraction and coordinate mapping
//! - `detect`: `Detector` capability, class maps, registry, backends
//! - `cascade`: the orchestrator
//! - `frame`: decoded RGB images and crops
//! - `config` / `loader`: service configuration and registry construction
//! - `service` / `api`: request handling and the HTTP surface

pub mod api;
pub mod cascade;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod loader;
pub mod service;

pub use cascade::{CascadeOptions, CascadeOrchestrator};
pub use config::ServiceConfig;
pub use detect::{
    CascadeResult, ClassMap, Detection, DetectionKind, Detector, DetectorConfig,
    DetectorRegistry, Provenance, RawDetection, StubBackend,
};
pub use error::CascadeError;
pub use frame::Frame;
pub use geometry::{extract_region, to_original_frame, BoundingBox, Region, MIN_REGION_SIDE};
pub use service::{CascadeService, PredictResponse, ServiceInfo};
