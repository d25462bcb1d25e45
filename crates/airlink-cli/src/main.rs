use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use airlink_fc::{AutopilotLink, LinkConfig, SerialTransport, Setpoint, Transport};
use airlink_proto::{GlobalPose, TargetList, TargetLog};
use airlink_vision::camera::CameraConfig;
use airlink_vision::exec::ExecDetector;
use airlink_vision::pipeline::{PoseFn, VisionPipeline};
use airlink_vision::{LandmarkDetector, VisionConfig};

#[derive(Debug, Parser)]
#[command(name = "airlink", version, about = "Ground-side offboard control bridge")]
struct Cli {
    /// Serial device of the autopilot.
    #[arg(short = 'd', long = "device")]
    device: Option<String>,

    /// Serial baud rate.
    #[arg(short = 'b', long = "baud")]
    baud: Option<u32>,

    /// Optional TOML config with link/vision/camera sections.
    #[arg(long)]
    config: Option<String>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct Config {
    link: LinkConfig,
    vision: VisionConfig,
    camera: CameraConfig,
    targets_log: Option<String>,
}

fn load_config(path: Option<&str>) -> Result<Config> {
    match path {
        Some(p) => {
            let s = std::fs::read_to_string(p).with_context(|| format!("read config {}", p))?;
            toml::from_str(&s).context("parse config toml")
        }
        None => Ok(Config::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut cfg = load_config(cli.config.as_deref())?;
    if let Some(dev) = cli.device {
        cfg.link.serial_dev = dev;
    }
    if let Some(baud) = cli.baud {
        cfg.link.baud = baud;
    }

    run(cfg).await
}

async fn run(cfg: Config) -> Result<()> {
    // transport failures here are fatal, before any loop is spawned
    let transport: Arc<dyn Transport> = Arc::new(
        SerialTransport::open(
            &cfg.link.serial_dev,
            cfg.link.baud,
            cfg.link.sys_id,
            cfg.link.comp_id,
        )
        .context("open autopilot transport")?,
    );

    let link = Arc::new(AutopilotLink::new(transport, cfg.link.clone()));
    link.start().await.context("bring up autopilot link")?;

    // interrupt path: one best-effort offboard exit, then stop
    {
        let link = Arc::clone(&link);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received");
                link.handle_quit().await;
            }
        });
    }

    let targets = Arc::new(TargetList::new());
    let vision_stop = Arc::new(AtomicBool::new(false));
    let vision_task = if cfg.vision.enable {
        Some(spawn_vision(
            &cfg,
            Arc::clone(&link),
            Arc::clone(&targets),
            Arc::clone(&vision_stop),
        )?)
    } else {
        None
    };

    if let Err(e) = run_commands(&link).await {
        warn!(error = %e, "command sequence aborted");
    }

    // explicit shutdown condition instead of spinning: the link goes
    // terminal on interrupt or on fatal transport closure
    while !link.state().is_terminal() {
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    vision_stop.store(true, Ordering::Release);
    if let Some(task) = vision_task {
        if tokio::time::timeout(Duration::from_secs(3), task)
            .await
            .is_err()
        {
            warn!("vision pipeline did not stop in time");
        }
    }

    // idempotent: covers the path where the link died on its own
    link.handle_quit().await;

    for t in targets.snapshot() {
        info!(lat = t.lat, lon = t.lon, order = t.order, "located target");
    }
    info!("shutdown complete");
    Ok(())
}

/// The demo command sequence: enter offboard, step (-10, -5, -15) meters from
/// the initial position, watch the vehicle track it, then drop a one-shot
/// global setpoint offset from the current fix.
async fn run_commands(link: &AutopilotLink) -> Result<()> {
    if let Err(e) = link.enable_offboard_control().await {
        // not fatal: the stream keeps running and the caller may retry
        warn!(error = %e, "offboard enable refused");
    }

    let ip = link
        .initial_position()
        .context("no initial position recorded")?;
    link.update_setpoint(Setpoint::position(ip.x - 10.0, ip.y - 5.0, ip.z - 15.0));
    info!(
        x = ip.x - 10.0,
        y = ip.y - 5.0,
        z = ip.z - 15.0,
        "position setpoint dispatched"
    );

    for _ in 0..8 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        if let Some(pos) = link.telemetry().local_position {
            info!(x = pos.x, y = pos.y, z = pos.z, "current position");
        }
    }

    match link.telemetry().global_position {
        Some(g) => {
            let sp = Setpoint::global(g.lat - 4_000, g.lon - 4_000, g.relative_alt as f32 / 1000.0);
            link.send_setpoint_once(sp)
                .context("one-shot global setpoint")?;
            info!("global setpoint dispatched");
        }
        None => warn!("no global position fix, skipping global setpoint"),
    }

    if let Some(pos) = link.telemetry().local_position {
        info!(x = pos.x, y = pos.y, z = pos.z, "snapshot local position");
    }
    Ok(())
}

fn spawn_vision(
    cfg: &Config,
    link: Arc<AutopilotLink>,
    targets: Arc<TargetList>,
    stop: Arc<AtomicBool>,
) -> Result<tokio::task::JoinHandle<()>> {
    let detector = init_detector(&cfg.vision)?;
    let path = cfg.targets_log.as_deref().unwrap_or("targets.log");
    let log = Some(TargetLog::open(path).with_context(|| format!("open target log {}", path))?);

    let pose: PoseFn = Box::new(move || {
        let snap = link.telemetry();
        let g = snap.global_position?;
        Some((
            GlobalPose {
                lat: g.lat,
                lon: g.lon,
                rel_alt: g.relative_alt,
                hdg: g.hdg,
            },
            snap.stamps.global_position,
        ))
    });

    let pipeline = VisionPipeline::new(
        cfg.vision.clone(),
        cfg.camera.clone(),
        detector,
        pose,
        targets,
        log,
    );
    Ok(tokio::spawn(pipeline.run(stop)))
}

fn init_detector(v: &VisionConfig) -> Result<Box<dyn LandmarkDetector>> {
    let cmd = v
        .detector_cmd
        .as_deref()
        .context("vision.enable is set but vision.detector_cmd is missing")?;
    Ok(Box::new(ExecDetector::new(cmd)))
}
