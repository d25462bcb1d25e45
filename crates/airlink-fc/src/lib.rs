pub mod link;
pub mod setpoint;
pub mod state;
pub mod telemetry;
pub mod transport;

pub use link::{AutopilotLink, LinkError, ModeError};
pub use setpoint::{FieldMask, Frame, Setpoint};
pub use state::LinkState;
pub use telemetry::TelemetrySnapshot;
pub use transport::{ConnectionError, ReadError, SerialTransport, Transport, WriteError};

use serde::Deserialize;

/// Link parameters. Every field has a default so a config file only needs to
/// name what it changes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Serial device the autopilot is reachable on.
    pub serial_dev: String,
    pub baud: u32,

    /// MAVLink ids this station sends with.
    pub sys_id: u8,
    pub comp_id: u8,

    /// Autopilot system/component. 1/1 is the usual PX4/ArduPilot pairing.
    pub target_sys: u8,
    pub target_comp: u8,

    /// Setpoint stream rate. The autopilot falls back to failsafe if the
    /// stream stalls, so this must comfortably outpace its offboard timeout.
    pub stream_hz: f32,

    /// Station heartbeat rate.
    pub heartbeat_hz: f32,

    /// Wait after the offboard mode command before reporting the mode active.
    pub mode_grace_ms: u64,

    /// Bound on the wait for the first heartbeat and local position in
    /// [`AutopilotLink::start`].
    pub handshake_timeout_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            serial_dev: "/dev/ttyUSB0".into(),
            baud: 57_600,
            sys_id: 255,
            comp_id: 190,
            target_sys: 1,
            target_comp: 1,
            stream_hz: 4.0,
            heartbeat_hz: 1.0,
            mode_grace_ms: 100,
            handshake_timeout_ms: 10_000,
        }
    }
}
