use airlink_proto::{GlobalPose, TargetFix};

/// Centimeters of ground per 1e-7 degree of latitude.
pub const CM_PER_DEGE7: f32 = 1.113195;

/// Offset of a landmark from the vehicle in body frame, meters,
/// x forward / y right.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyOffset {
    pub x: f32,
    pub y: f32,
}

/// Centimeters of ground per 1e-7 degree of longitude at this latitude.
pub fn lon_cm_per_dege7(lat_e7: i32) -> f32 {
    CM_PER_DEGE7 * ((lat_e7 as f64 * 1e-7).to_radians().cos() as f32)
}

/// Rotate a body offset into north/east by the vehicle heading, scale into
/// fixed-point degrees and anchor at the current position.
pub fn target_from_offset(off: BodyOffset, pose: &GlobalPose, order: u32) -> TargetFix {
    let yaw = pose.heading_deg().to_radians();
    let north = off.x * yaw.cos() + off.y * yaw.sin();
    let east = off.y * yaw.cos() - off.x * yaw.sin();
    TargetFix {
        lat: pose.lat + (north * 100.0 / CM_PER_DEGE7) as i32,
        lon: pose.lon + (east * 100.0 / lon_cm_per_dege7(pose.lat)) as i32,
        rel_alt: pose.rel_alt,
        order,
        pattern: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pose_at(lat: i32, hdg: u16) -> GlobalPose {
        GlobalPose {
            lat,
            lon: 85_455_940,
            rel_alt: 12_000,
            hdg,
        }
    }

    #[test]
    fn one_meter_forward_at_zero_heading_moves_latitude_only() {
        let pose = pose_at(0, 0);
        let fix = target_from_offset(BodyOffset { x: 1.0, y: 0.0 }, &pose, 0);
        assert_eq!(fix.lat - pose.lat, (100.0 / CM_PER_DEGE7) as i32);
        assert_eq!(fix.lon, pose.lon);
        assert_eq!(fix.rel_alt, pose.rel_alt);
    }

    #[test]
    fn longitude_scale_shrinks_with_latitude() {
        assert!((lon_cm_per_dege7(0) - CM_PER_DEGE7).abs() < 1e-6);
        // at 60°N one degree of longitude covers half the ground
        let at_60 = lon_cm_per_dege7(600_000_000);
        assert!((at_60 - CM_PER_DEGE7 / 2.0).abs() < 1e-3);
    }

    #[test]
    fn sideways_offset_moves_longitude_at_zero_heading() {
        let pose = pose_at(0, 0);
        let fix = target_from_offset(BodyOffset { x: 0.0, y: 2.0 }, &pose, 1);
        assert_eq!(fix.lat, pose.lat);
        assert_eq!(fix.lon - pose.lon, (200.0 / CM_PER_DEGE7) as i32);
    }

    #[test]
    fn heading_rotates_the_offset() {
        // heading 180°: forward now points south
        let pose = pose_at(0, 18_000);
        let fix = target_from_offset(BodyOffset { x: 1.0, y: 0.0 }, &pose, 2);
        assert!(fix.lat < pose.lat);
    }
}
