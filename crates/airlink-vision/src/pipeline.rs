use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use airlink_proto::{GlobalPose, TargetList, TargetLog};
use image::GrayImage;
use tracing::{debug, info, warn};

use crate::camera::{capture_gray, CameraConfig};
use crate::geo::{target_from_offset, BodyOffset};
use crate::pattern::confirm_pattern;
use crate::{LandmarkDetector, VisionConfig};

/// Reads the vehicle pose from whoever mirrors telemetry: the pose plus its
/// microsecond stamp, or `None` before the first global fix.
pub type PoseFn = Box<dyn Fn() -> Option<(GlobalPose, u64)> + Send>;

/// Camera, detector and geo-referencing loop. Not safety critical: pose reads
/// have no snapshot isolation and unusable frames are simply skipped.
pub struct VisionPipeline {
    cfg: VisionConfig,
    camera: CameraConfig,
    detector: Box<dyn LandmarkDetector>,
    pose: PoseFn,
    targets: Arc<TargetList>,
    log: Option<TargetLog>,
    next_order: u32,
}

impl VisionPipeline {
    pub fn new(
        cfg: VisionConfig,
        camera: CameraConfig,
        detector: Box<dyn LandmarkDetector>,
        pose: PoseFn,
        targets: Arc<TargetList>,
        log: Option<TargetLog>,
    ) -> Self {
        Self {
            cfg,
            camera,
            detector,
            pose,
            targets,
            log,
            next_order: 0,
        }
    }

    /// Runs until `stop` flips. A camera failure on the very first grab ends
    /// the pipeline quietly (fatal for this task only); later grab failures
    /// are logged and the frame skipped.
    pub async fn run(mut self, stop: Arc<AtomicBool>) {
        info!("vision pipeline up");
        let mut first_frame = true;
        while !stop.load(Ordering::Acquire) {
            let gray = match capture_gray(&self.camera).await {
                Ok(g) => g,
                Err(e) if first_frame => {
                    warn!(error = %e, "camera unavailable, vision pipeline exiting");
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "frame grab failed");
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    continue;
                }
            };
            first_frame = false;
            self.process_frame(&gray);
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        info!("vision pipeline down");
    }

    /// One frame: detect, geo-reference every confident landmark, append to
    /// the target list and the log.
    fn process_frame(&mut self, gray: &GrayImage) {
        let landmarks = match self.detector.detect(gray) {
            Ok(l) => l,
            Err(e) => {
                warn!(error = %e, "detector failed on frame");
                return;
            }
        };
        if landmarks.is_empty() {
            // expected steady state
            return;
        }

        let Some((pose, stamp)) = (self.pose)() else {
            debug!("no global position yet, skipping frame");
            return;
        };

        let scale = pose.rel_alt_m().max(0.0) * self.cfg.ground_res;
        let (w, h) = (gray.width() as f32, gray.height() as f32);
        let mut fresh = 0u32;

        for lm in &landmarks {
            if lm.score < self.cfg.min_score {
                continue;
            }
            // nadir camera: image up is body forward, image right is body right
            let off = BodyOffset {
                x: (h / 2.0 - lm.cy) * scale,
                y: (lm.cx - w / 2.0) * scale,
            };
            let mut fix = target_from_offset(off, &pose, self.next_order);
            if self.cfg.pattern_check {
                fix.pattern = confirm_pattern(gray, lm);
            }
            self.next_order += 1;

            debug!(lat = fix.lat, lon = fix.lon, order = fix.order, "target located");
            self.targets.append(fix);
            if let Some(log) = self.log.as_mut() {
                if let Err(e) = log.log_target(&fix) {
                    warn!(error = %e, "target log write failed");
                }
            }
            fresh += 1;
        }

        if fresh > 0 {
            info!(count = fresh, total = self.targets.len(), "targets appended");
            if let Some(log) = self.log.as_mut() {
                if let Err(e) = log.log_pose(stamp, &pose) {
                    warn!(error = %e, "target log write failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Landmark;
    use image::Luma;

    struct Scripted(Vec<Landmark>);

    impl LandmarkDetector for Scripted {
        fn detect(&mut self, _gray: &GrayImage) -> anyhow::Result<Vec<Landmark>> {
            Ok(self.0.clone())
        }
    }

    fn pose() -> GlobalPose {
        GlobalPose {
            lat: 473_977_420,
            lon: 85_455_940,
            rel_alt: 0,
            hdg: 0,
        }
    }

    fn pipeline(landmarks: Vec<Landmark>, cfg: VisionConfig) -> (VisionPipeline, Arc<TargetList>) {
        let targets = Arc::new(TargetList::new());
        let p = VisionPipeline::new(
            cfg,
            CameraConfig::default(),
            Box::new(Scripted(landmarks)),
            Box::new(|| Some((pose(), 1_000))),
            Arc::clone(&targets),
            None,
        );
        (p, targets)
    }

    fn centered(score: f32) -> Landmark {
        Landmark {
            cx: 320.0,
            cy: 240.0,
            a: 30.0,
            b: 25.0,
            theta: 0.0,
            score,
        }
    }

    #[test]
    fn centered_landmark_at_zero_altitude_lands_on_the_vehicle() {
        let (mut p, targets) = pipeline(vec![centered(0.9)], VisionConfig::default());
        let gray = GrayImage::from_pixel(640, 480, Luma([128u8]));
        p.process_frame(&gray);

        let fixes = targets.snapshot();
        assert_eq!(fixes.len(), 1);
        assert_eq!(fixes[0].lat, pose().lat);
        assert_eq!(fixes[0].lon, pose().lon);
        assert_eq!(fixes[0].order, 0);
    }

    #[test]
    fn low_scores_are_dropped() {
        let (mut p, targets) = pipeline(
            vec![centered(0.1), centered(0.8)],
            VisionConfig::default(),
        );
        let gray = GrayImage::from_pixel(640, 480, Luma([128u8]));
        p.process_frame(&gray);
        assert_eq!(targets.len(), 1);
    }

    #[test]
    fn order_tags_increase_across_frames() {
        let (mut p, targets) = pipeline(vec![centered(0.9)], VisionConfig::default());
        let gray = GrayImage::from_pixel(640, 480, Luma([128u8]));
        p.process_frame(&gray);
        p.process_frame(&gray);

        let fixes = targets.snapshot();
        assert_eq!(fixes.len(), 2);
        assert_eq!((fixes[0].order, fixes[1].order), (0, 1));
    }

    #[test]
    fn small_landmarks_carry_no_pattern_verdict() {
        let (mut p, targets) = pipeline(vec![centered(0.9)], VisionConfig::default());
        let gray = GrayImage::from_pixel(640, 480, Luma([128u8]));
        p.process_frame(&gray);
        assert_eq!(targets.snapshot()[0].pattern, None);
    }
}
