use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Vehicle pose as last seen in GLOBAL_POSITION_INT. Units follow the wire
/// encoding: lat/lon in degE7, relative altitude in mm, heading in cdeg.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlobalPose {
    pub lat: i32,
    pub lon: i32,
    pub rel_alt: i32,
    pub hdg: u16,
}

impl GlobalPose {
    pub fn rel_alt_m(&self) -> f32 {
        self.rel_alt as f32 / 1000.0
    }

    pub fn heading_deg(&self) -> f32 {
        self.hdg as f32 / 100.0
    }
}

/// A located landing target. Same fixed-point units as [`GlobalPose`];
/// `order` is the detection sequence tag, `pattern` the best-effort
/// pad-pattern confirmation (None when the landmark was too small to judge).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetFix {
    pub lat: i32,
    pub lon: i32,
    pub rel_alt: i32,
    pub order: u32,
    pub pattern: Option<bool>,
}

/// Process-wide list of located targets. Appended by the vision pipeline,
/// snapshot-read by everyone else; never pruned during a run.
#[derive(Debug, Default)]
pub struct TargetList {
    fixes: Mutex<Vec<TargetFix>>,
}

impl TargetList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, fix: TargetFix) {
        self.fixes.lock().unwrap().push(fix);
    }

    pub fn snapshot(&self) -> Vec<TargetFix> {
        self.fixes.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.fixes.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Append-only text log of located targets, one `key:value` line per field.
pub struct TargetLog {
    out: BufWriter<File>,
}

impl TargetLog {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            out: BufWriter::new(file),
        })
    }

    pub fn log_target(&mut self, fix: &TargetFix) -> io::Result<()> {
        self.out.write_all(format_target(fix).as_bytes())?;
        self.out.flush()
    }

    pub fn log_pose(&mut self, stamp_us: u64, pose: &GlobalPose) -> io::Result<()> {
        self.out.write_all(format_pose(stamp_us, pose).as_bytes())?;
        self.out.flush()
    }
}

fn format_target(fix: &TargetFix) -> String {
    let mut s = format!(
        "----------target:\nlat:{}\nlon:{}\norder:{}\n",
        fix.lat, fix.lon, fix.order
    );
    if let Some(p) = fix.pattern {
        s.push_str(&format!("pattern:{}\n", if p { "T" } else { "F" }));
    }
    s
}

fn format_pose(stamp_us: u64, pose: &GlobalPose) -> String {
    format!(
        "----------current_status:\ntime:{}\nlat:{}\nlon:{}\nrelative_alt:{}\nhdg:{}\n",
        stamp_us, pose.lat, pose.lon, pose.rel_alt, pose.hdg
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_lines_carry_lat_lon_order() {
        let fix = TargetFix {
            lat: 473_977_420,
            lon: 85_455_940,
            rel_alt: 12_000,
            order: 3,
            pattern: Some(true),
        };
        let s = format_target(&fix);
        assert!(s.contains("lat:473977420\n"));
        assert!(s.contains("lon:85455940\n"));
        assert!(s.contains("order:3\n"));
        assert!(s.contains("pattern:T\n"));
    }

    #[test]
    fn pattern_line_absent_when_unjudged() {
        let fix = TargetFix {
            lat: 1,
            lon: 2,
            rel_alt: 0,
            order: 0,
            pattern: None,
        };
        assert!(!format_target(&fix).contains("pattern:"));
    }

    #[test]
    fn list_appends_in_order() {
        let list = TargetList::new();
        for order in 0..4 {
            list.append(TargetFix {
                lat: 0,
                lon: 0,
                rel_alt: 0,
                order,
                pattern: None,
            });
        }
        let fixes = list.snapshot();
        assert_eq!(fixes.len(), 4);
        assert!(fixes.windows(2).all(|w| w[0].order < w[1].order));
    }

    #[test]
    fn pose_block_is_keyed() {
        let pose = GlobalPose {
            lat: 10,
            lon: 20,
            rel_alt: 5000,
            hdg: 9000,
        };
        let s = format_pose(42, &pose);
        assert!(s.contains("time:42\n"));
        assert!(s.contains("relative_alt:5000\n"));
        assert_eq!(pose.rel_alt_m(), 5.0);
        assert_eq!(pose.heading_deg(), 90.0);
    }
}
