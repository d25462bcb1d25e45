pub mod camera;
pub mod exec;
pub mod geo;
pub mod pattern;
pub mod pipeline;

use anyhow::Result;
use image::GrayImage;
use serde::Deserialize;

/// One detected elliptical landmark in pixel space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Landmark {
    pub cx: f32,
    pub cy: f32,
    /// Semi-axes in pixels, major first.
    pub a: f32,
    pub b: f32,
    /// Rotation of the major axis, radians.
    pub theta: f32,
    /// Detector reliability, 0..1.
    pub score: f32,
}

/// The injected detection capability: one grayscale frame in, landmarks out.
/// An empty result is steady state, not a failure.
pub trait LandmarkDetector: Send {
    fn detect(&mut self, gray: &GrayImage) -> Result<Vec<Landmark>>;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub enable: bool,

    /// External detector executable; gets the frame as PNG on stdin and
    /// prints one `cx cy a b theta score` line per landmark.
    pub detector_cmd: Option<String>,

    /// Landmarks scoring below this are dropped.
    pub min_score: f32,

    /// Ground resolution: meters per pixel per meter of altitude.
    pub ground_res: f32,

    /// Probe large landmarks for the pad's light/dark pattern.
    pub pattern_check: bool,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            enable: false,
            detector_cmd: None,
            min_score: 0.4,
            ground_res: 0.0018,
            pattern_check: true,
        }
    }
}
