pub mod target;

pub use target::{GlobalPose, TargetFix, TargetList, TargetLog};
