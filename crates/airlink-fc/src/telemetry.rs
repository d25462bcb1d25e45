use mavlink::common::{
    MavMessage, ATTITUDE_DATA, GLOBAL_POSITION_INT_DATA, HEARTBEAT_DATA, LOCAL_POSITION_NED_DATA,
    POSITION_TARGET_LOCAL_NED_DATA,
};

/// Wall-clock microseconds, the stamp resolution used across the process.
pub fn now_us() -> u64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000) as u64
}

/// Last-update stamp (µs) per slot; zero until that kind first arrives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timestamps {
    pub heartbeat: u64,
    pub local_position: u64,
    pub global_position: u64,
    pub attitude: u64,
    pub target_echo: u64,
}

/// Latest-known mirror of the vehicle, one slot per consumed message kind.
/// `None` means never received. Written only by the link's read loop; read
/// anywhere as a clone taken under the lock, so multi-field reads may be
/// slightly stale but individual slots are always whole.
#[derive(Debug, Clone, Default)]
pub struct TelemetrySnapshot {
    pub heartbeat: Option<HEARTBEAT_DATA>,
    pub local_position: Option<LOCAL_POSITION_NED_DATA>,
    pub global_position: Option<GLOBAL_POSITION_INT_DATA>,
    pub attitude: Option<ATTITUDE_DATA>,
    /// The autopilot's echo of the streamed setpoint.
    pub target_echo: Option<POSITION_TARGET_LOCAL_NED_DATA>,
    pub stamps: Timestamps,
}

impl TelemetrySnapshot {
    /// Merge one decoded message into its slot. Only the slot for the
    /// incoming kind moves, and its stamp never goes backwards. Returns
    /// false for kinds this snapshot does not track.
    pub fn merge(&mut self, msg: &MavMessage, stamp_us: u64) -> bool {
        match msg {
            MavMessage::HEARTBEAT(d) => {
                self.heartbeat = Some(d.clone());
                self.stamps.heartbeat = self.stamps.heartbeat.max(stamp_us);
            }
            MavMessage::LOCAL_POSITION_NED(d) => {
                self.local_position = Some(d.clone());
                self.stamps.local_position = self.stamps.local_position.max(stamp_us);
            }
            MavMessage::GLOBAL_POSITION_INT(d) => {
                self.global_position = Some(d.clone());
                self.stamps.global_position = self.stamps.global_position.max(stamp_us);
            }
            MavMessage::ATTITUDE(d) => {
                self.attitude = Some(d.clone());
                self.stamps.attitude = self.stamps.attitude.max(stamp_us);
            }
            MavMessage::POSITION_TARGET_LOCAL_NED(d) => {
                self.target_echo = Some(d.clone());
                self.stamps.target_echo = self.stamps.target_echo.max(stamp_us);
            }
            _ => return false,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_position(x: f32) -> MavMessage {
        MavMessage::LOCAL_POSITION_NED(LOCAL_POSITION_NED_DATA {
            time_boot_ms: 1,
            x,
            y: 0.0,
            z: 0.0,
            vx: 0.0,
            vy: 0.0,
            vz: 0.0,
        })
    }

    #[test]
    fn slot_holds_latest_decode_and_stamp_moves_forward() {
        let mut snap = TelemetrySnapshot::default();
        assert!(snap.local_position.is_none());

        assert!(snap.merge(&local_position(1.0), 100));
        assert!(snap.merge(&local_position(2.0), 250));

        let pos = snap.local_position.as_ref().unwrap();
        assert_eq!(pos.x, 2.0);
        assert_eq!(snap.stamps.local_position, 250);
    }

    #[test]
    fn stale_stamp_does_not_regress() {
        let mut snap = TelemetrySnapshot::default();
        snap.merge(&local_position(1.0), 500);
        snap.merge(&local_position(2.0), 400);
        // value is last-write-wins, the stamp keeps the newest time seen
        assert_eq!(snap.local_position.as_ref().unwrap().x, 2.0);
        assert_eq!(snap.stamps.local_position, 500);
    }

    #[test]
    fn merge_touches_only_the_incoming_kind() {
        let mut snap = TelemetrySnapshot::default();
        snap.merge(&local_position(1.0), 100);
        let att = MavMessage::ATTITUDE(ATTITUDE_DATA {
            time_boot_ms: 2,
            roll: 0.1,
            pitch: 0.0,
            yaw: 1.5,
            rollspeed: 0.0,
            pitchspeed: 0.0,
            yawspeed: 0.0,
        });
        snap.merge(&att, 200);

        assert_eq!(snap.stamps.local_position, 100);
        assert_eq!(snap.stamps.attitude, 200);
        assert!(snap.global_position.is_none());
    }

    #[test]
    fn unknown_kinds_are_reported() {
        let mut snap = TelemetrySnapshot::default();
        let ping = MavMessage::PING(mavlink::common::PING_DATA {
            time_usec: 1,
            seq: 0,
            target_system: 0,
            target_component: 0,
        });
        assert!(!snap.merge(&ping, 100));
    }
}
