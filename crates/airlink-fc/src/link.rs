use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use mavlink::common::{
    MavAutopilot, MavCmd, MavMessage, MavModeFlag, MavState, MavType, COMMAND_LONG_DATA,
    HEARTBEAT_DATA, LOCAL_POSITION_NED_DATA,
};
use mavlink::Message as _;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::setpoint::Setpoint;
use crate::state::LinkState;
use crate::telemetry::{now_us, TelemetrySnapshot};
use crate::transport::{ReadError, Transport, WriteError};
use crate::LinkConfig;

/// Poll interval of the blocking loops while the port is idle. Also the
/// bound on how long a stop request can go unobserved.
const IDLE_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("link already started")]
    AlreadyStarted,
    #[error("link already stopped")]
    Stopped,
    #[error("transport is closed")]
    TransportClosed,
    #[error("no {0} within the handshake window")]
    Handshake(&'static str),
}

#[derive(Debug, Error)]
pub enum ModeError {
    #[error("offboard change refused in state {0}")]
    WrongState(LinkState),
    #[error("offboard command send failed: {0}")]
    Send(#[from] WriteError),
}

struct Shared {
    telemetry: Mutex<TelemetrySnapshot>,
    setpoint: Mutex<Setpoint>,
    state: Mutex<LinkState>,
    stop: AtomicBool,
}

impl Shared {
    fn set_state(&self, next: LinkState) {
        let mut st = self.state.lock().unwrap();
        if *st != next {
            let prev = *st;
            info!(from = %prev, to = %next, "link state");
            *st = next;
        }
    }
}

/// Pacing and addressing the write loop needs, detached from the link so the
/// blocking thread owns a plain copy.
#[derive(Clone, Copy)]
struct Cadence {
    period: Duration,
    hb_period: Duration,
    target_sys: u8,
    target_comp: u8,
}

/// Read/write-loop driven interface to the autopilot.
///
/// `start` spawns a blocking read loop that mirrors incoming telemetry into
/// the shared snapshot, and a blocking write loop that streams the current
/// setpoint at a fixed cadence. Offboard mode is entered and left through
/// explicit mode commands; the exit command is attempted on every shutdown
/// path, including the interrupt path, because a vehicle left in offboard
/// without a stream falls into failsafe.
pub struct AutopilotLink {
    transport: Arc<dyn Transport>,
    shared: Arc<Shared>,
    read_task: Mutex<Option<JoinHandle<()>>>,
    write_task: Mutex<Option<JoinHandle<()>>>,
    initial_position: Mutex<Option<LOCAL_POSITION_NED_DATA>>,
    boot: Instant,
    quit_once: AtomicBool,
    cfg: LinkConfig,
}

impl AutopilotLink {
    pub fn new(transport: Arc<dyn Transport>, cfg: LinkConfig) -> Self {
        Self {
            transport,
            shared: Arc::new(Shared {
                telemetry: Mutex::new(TelemetrySnapshot::default()),
                setpoint: Mutex::new(Setpoint::default()),
                state: Mutex::new(LinkState::Disconnected),
                stop: AtomicBool::new(false),
            }),
            read_task: Mutex::new(None),
            write_task: Mutex::new(None),
            initial_position: Mutex::new(None),
            boot: Instant::now(),
            quit_once: AtomicBool::new(false),
            cfg,
        }
    }

    /// Spawns the read loop, waits (bounded by `handshake_timeout_ms`) for
    /// the first heartbeat and local position, records the initial position,
    /// seeds the setpoint with it, then spawns the write loop and moves to
    /// `Connected`.
    ///
    /// A second call fails with [`LinkError::AlreadyStarted`]; a link whose
    /// start failed stays stopped and is not restartable.
    pub async fn start(&self) -> Result<(), LinkError> {
        if self.read_task.lock().unwrap().is_some() {
            return Err(LinkError::AlreadyStarted);
        }
        if self.shared.stop.load(Ordering::Acquire) {
            return Err(LinkError::Stopped);
        }
        if self.transport.is_closed() {
            return Err(LinkError::TransportClosed);
        }

        let read = {
            let transport = Arc::clone(&self.transport);
            let shared = Arc::clone(&self.shared);
            tokio::task::spawn_blocking(move || read_loop(transport, shared))
        };
        *self.read_task.lock().unwrap() = Some(read);

        let deadline = Instant::now() + Duration::from_millis(self.cfg.handshake_timeout_ms);
        if !self.wait_until(deadline, |t| t.heartbeat.is_some()).await {
            self.abort_start().await;
            return Err(LinkError::Handshake("heartbeat"));
        }
        debug!("autopilot heartbeat seen");

        if !self
            .wait_until(deadline, |t| t.local_position.is_some())
            .await
        {
            self.abort_start().await;
            return Err(LinkError::Handshake("local position"));
        }
        let Some(ip) = self.telemetry().local_position else {
            self.abort_start().await;
            return Err(LinkError::Handshake("local position"));
        };
        info!(x = ip.x, y = ip.y, z = ip.z, "initial position recorded");

        // hold the initial position until the command layer says otherwise
        *self.shared.setpoint.lock().unwrap() = Setpoint::position(ip.x, ip.y, ip.z);
        *self.initial_position.lock().unwrap() = Some(ip);

        let write = {
            let transport = Arc::clone(&self.transport);
            let shared = Arc::clone(&self.shared);
            let cadence = Cadence {
                period: Duration::from_secs_f32(1.0 / self.cfg.stream_hz.max(0.2)),
                hb_period: Duration::from_secs_f32(1.0 / self.cfg.heartbeat_hz.max(0.2)),
                target_sys: self.cfg.target_sys,
                target_comp: self.cfg.target_comp,
            };
            let boot = self.boot;
            tokio::task::spawn_blocking(move || write_loop(transport, shared, cadence, boot))
        };
        *self.write_task.lock().unwrap() = Some(write);

        self.shared.set_state(LinkState::Connected);
        Ok(())
    }

    async fn wait_until(
        &self,
        deadline: Instant,
        ready: impl Fn(&TelemetrySnapshot) -> bool,
    ) -> bool {
        while Instant::now() < deadline {
            if ready(&self.shared.telemetry.lock().unwrap()) {
                return true;
            }
            tokio::time::sleep(IDLE_POLL).await;
        }
        false
    }

    async fn abort_start(&self) {
        self.shared.stop.store(true, Ordering::Release);
        let read = self.read_task.lock().unwrap().take();
        if let Some(handle) = read {
            let _ = handle.await;
        }
    }

    /// Overwrite the setpoint the write loop sends on its next tick.
    /// Last write wins; nothing is queued.
    pub fn update_setpoint(&self, sp: Setpoint) {
        *self.shared.setpoint.lock().unwrap() = sp;
        debug!(?sp, "setpoint updated");
    }

    /// Clone of the latest telemetry mirror.
    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.shared.telemetry.lock().unwrap().clone()
    }

    /// Local position recorded when the link came up.
    pub fn initial_position(&self) -> Option<LOCAL_POSITION_NED_DATA> {
        self.initial_position.lock().unwrap().clone()
    }

    pub fn state(&self) -> LinkState {
        *self.shared.state.lock().unwrap()
    }

    /// Raw passthrough for one-shot messages the command layer builds itself.
    pub fn write_message(&self, msg: &MavMessage) -> Result<usize, WriteError> {
        self.transport.write_message(msg)
    }

    /// Encode and send one setpoint outside the stream; the streamed
    /// setpoint is unaffected.
    pub fn send_setpoint_once(&self, sp: Setpoint) -> Result<usize, WriteError> {
        let msg = sp.encode(
            self.boot.elapsed().as_millis() as u32,
            self.cfg.target_sys,
            self.cfg.target_comp,
        );
        self.transport.write_message(&msg)
    }

    /// Request offboard mode. Sends the mode command, then reports the mode
    /// active after a short grace period without waiting for an ack; the
    /// setpoint stream is what actually sustains the mode. No-op when the
    /// mode is already active; resendable from `OffboardRequested`.
    pub async fn enable_offboard_control(&self) -> Result<(), ModeError> {
        match self.state() {
            LinkState::Connected | LinkState::OffboardRequested => {}
            LinkState::OffboardActive => return Ok(()),
            s => return Err(ModeError::WrongState(s)),
        }
        self.shared.set_state(LinkState::OffboardRequested);
        self.send_offboard_toggle(true)?;
        tokio::time::sleep(Duration::from_millis(self.cfg.mode_grace_ms)).await;
        self.shared.set_state(LinkState::OffboardActive);
        Ok(())
    }

    /// Request exit from offboard mode. Allowed from any non-terminal state;
    /// the exit intent is recorded before the send so a failed write still
    /// leaves the link visibly on its way out. Never silent.
    pub fn disable_offboard_control(&self) -> Result<(), ModeError> {
        let s = self.state();
        if s.is_terminal() {
            return Err(ModeError::WrongState(s));
        }
        self.shared.set_state(LinkState::OffboardExiting);
        match self.send_offboard_toggle(false) {
            Ok(()) => {
                info!("offboard exit commanded");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "offboard exit command failed");
                Err(ModeError::Send(e))
            }
        }
    }

    fn send_offboard_toggle(&self, engage: bool) -> Result<(), WriteError> {
        let cmd = COMMAND_LONG_DATA {
            target_system: self.cfg.target_sys,
            target_component: self.cfg.target_comp,
            command: MavCmd::MAV_CMD_NAV_GUIDED_ENABLE,
            confirmation: 0,
            param1: if engage { 1.0 } else { 0.0 },
            param2: 0.0,
            param3: 0.0,
            param4: 0.0,
            param5: 0.0,
            param6: 0.0,
            param7: 0.0,
        };
        self.transport
            .write_message(&MavMessage::COMMAND_LONG(cmd))
            .map(|_| ())
    }

    /// Stop both loops, join them, close the transport and go terminal.
    /// Idempotent, and safe when the transport is already closed: the loops
    /// observe the stop flag within one poll interval.
    pub async fn stop(&self) {
        self.shared.stop.store(true, Ordering::Release);
        let write = self.write_task.lock().unwrap().take();
        if let Some(handle) = write {
            let _ = handle.await;
        }
        let read = self.read_task.lock().unwrap().take();
        if let Some(handle) = read {
            let _ = handle.await;
        }
        self.transport.close();
        self.shared.set_state(LinkState::Quitting);
    }

    /// Best-effort shutdown used by the interrupt path: exactly one offboard
    /// exit attempt per link, failures swallowed after logging, then `stop`.
    pub async fn handle_quit(&self) {
        if !self.quit_once.swap(true, Ordering::SeqCst) {
            warn!("shutdown requested");
            if let Err(e) = self.disable_offboard_control() {
                warn!(error = %e, "offboard exit attempt failed during shutdown");
            }
        }
        self.stop().await;
    }
}

fn read_loop(transport: Arc<dyn Transport>, shared: Arc<Shared>) {
    debug!("read loop up");
    loop {
        if shared.stop.load(Ordering::Acquire) {
            break;
        }
        match transport.read_message() {
            Ok((_header, msg)) => {
                let stamp = now_us();
                let known = shared.telemetry.lock().unwrap().merge(&msg, stamp);
                if !known {
                    debug!(id = msg.message_id(), "unhandled message kind");
                }
            }
            Err(ReadError::Timeout) => {
                std::thread::sleep(IDLE_POLL);
            }
            Err(ReadError::Frame(e)) => {
                warn!(error = %e, "dropping undecodable frame");
            }
            Err(ReadError::Closed(reason)) => {
                warn!(%reason, "transport closed, read loop exiting");
                shared.set_state(LinkState::Quitting);
                break;
            }
        }
    }
    debug!("read loop down");
}

fn write_loop(transport: Arc<dyn Transport>, shared: Arc<Shared>, cad: Cadence, boot: Instant) {
    debug!("write loop up");
    // first tick carries a heartbeat
    let mut next_hb = Instant::now();
    loop {
        if shared.stop.load(Ordering::Acquire) {
            break;
        }
        if Instant::now() >= next_hb {
            if let Err(e) = transport.write_message(&station_heartbeat()) {
                debug!(error = %e, "heartbeat write failed");
            }
            next_hb = Instant::now() + cad.hb_period;
        }

        let sp = *shared.setpoint.lock().unwrap();
        let msg = sp.encode(
            boot.elapsed().as_millis() as u32,
            cad.target_sys,
            cad.target_comp,
        );
        if let Err(e) = transport.write_message(&msg) {
            // a missed tick degrades gracefully: the autopilot times out to
            // its own failsafe if the stream actually stops
            warn!(error = %e, "setpoint write failed");
        }
        std::thread::sleep(cad.period);
    }
    debug!("write loop down");
}

fn station_heartbeat() -> MavMessage {
    MavMessage::HEARTBEAT(HEARTBEAT_DATA {
        custom_mode: 0,
        mavtype: MavType::MAV_TYPE_GCS,
        autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
        base_mode: MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED,
        system_status: MavState::MAV_STATE_ACTIVE,
        mavlink_version: 3,
    })
}
