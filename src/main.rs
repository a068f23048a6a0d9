use clap::Parser;
use color_eyre::eyre::{self, Result, WrapErr};
use futures::{SinkExt, StreamExt};
use std::{
    future::{pending, Future},
    path::{Path, PathBuf},
    pin::Pin,
    sync::Mutex,
    time::Duration,
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::broadcast,
};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{self as log};

use gimbal_control::{attitude_sample, ControllerHandle, PointingController};
use gimbal_core::{GimbalAngles, GimbalTrackConfig, StatusEvent};
use gimbal_serial::{SerialTransport, Transport};

mod codec;
use codec::JsonLinesCodec;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[clap(subcommand)]
    command: Option<Commands>,

    /// Path to serial port of the gimbal (overrides the configuration)
    #[arg(long)]
    port: Option<String>,

    /// Filename of configuration in YAML format
    #[arg(long)]
    config: Option<PathBuf>,

    /// If set, logs are also saved to this directory.
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[derive(Debug, clap::Subcommand, Default)]
enum Commands {
    /// Run the controller, reading operator commands as JSON lines on stdin
    /// (default command)
    #[default]
    Run,
    /// Show the configuration and then quit
    ShowConfig,
    /// Recenter the gimbal and quit
    Home,
    /// Move to absolute angles in degrees and quit
    SetAngles {
        #[arg(allow_hyphen_values = true)]
        yaw: f64,
        #[arg(allow_hyphen_values = true)]
        pitch: f64,
    },
    /// Read the attitude once, print it and quit
    Attitude,
}

fn init_logging(log_dir: Option<&Path>) -> Result<()> {
    use time::{format_description::well_known::Iso8601, UtcOffset};
    use tracing_subscriber::{
        fmt::{self, time::OffsetTime},
        layer::SubscriberExt,
    };

    // Create a fixed offset time formatter based on the timezone at the
    // time this line of code runs.
    let timer = OffsetTime::new(
        UtcOffset::from_whole_seconds(chrono::Local::now().offset().local_minus_utc())?,
        Iso8601::DEFAULT,
    );

    let file_layer = match log_dir {
        Some(log_dir) => {
            std::fs::create_dir_all(log_dir)
                .with_context(|| format!("While creating directory {}", log_dir.display()))?;
            let log_file_name = chrono::Local::now()
                .format("gimbal-track-%Y%m%d_%H%M%S.%f.log")
                .to_string();
            let full_log_file_name = log_dir.join(log_file_name);
            let file = std::fs::File::create(&full_log_file_name).with_context(|| {
                format!("While creating file {}", full_log_file_name.display())
            })?;
            Some(
                fmt::layer()
                    .with_timer(timer.clone())
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_file(true)
                    .with_line_number(true),
            )
        }
        None => None,
    };
    // stdout carries status events, so the console log goes to stderr
    let console_layer = fmt::layer()
        .with_timer(timer)
        .with_writer(std::io::stderr)
        .with_file(true)
        .with_line_number(true);
    let collector = tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .with(tracing_subscriber::filter::EnvFilter::from_default_env());
    tracing::subscriber::set_global_default(collector)?;
    std::panic::set_hook(Box::new(tracing_panic::panic_hook));
    Ok(())
}

fn load_config(cli: &Cli) -> Result<GimbalTrackConfig> {
    let mut cfg: GimbalTrackConfig = if let Some(fname) = &cli.config {
        log::info!("Reading configuration from: {}", fname.display());
        let cfg_buf = std::fs::read_to_string(fname)
            .with_context(|| format!("opening file {}", fname.display()))?;
        serde_yaml::from_str(&cfg_buf)
            .with_context(|| format!("while parsing YAML in file {}", fname.display()))?
    } else {
        log::info!("Loading default configuration.");
        GimbalTrackConfig::default()
    };
    if let Some(port) = &cli.port {
        cfg.serial.port_path = port.clone();
    }
    cfg.validate().wrap_err("invalid configuration")?;
    Ok(cfg)
}

fn open_transport(cfg: &GimbalTrackConfig) -> Result<SerialTransport> {
    SerialTransport::open(&cfg.serial)
        .with_context(|| format!("Failed to open gimbal serial device {}", cfg.serial.port_path))
}

/// Reads the attitude back periodically. Failures are logged and polling
/// continues. Never returns.
async fn poll_attitude<P>(
    transport: Transport<P>,
    period: Duration,
    status_tx: broadcast::Sender<StatusEvent>,
) -> Result<()>
where
    P: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut tick = tokio::time::interval(period);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tick.tick().await;
        match transport.request_attitude().await {
            Ok(report) => {
                status_tx
                    .send(StatusEvent::Attitude(attitude_sample(&report)))
                    .ok();
            }
            Err(e) => {
                log::warn!("attitude poll failed: {e}");
            }
        }
    }
}

async fn run(cfg: GimbalTrackConfig) -> Result<()> {
    let transport = open_transport(&cfg)?;

    let (handle, inputs) = ControllerHandle::new(64);
    let mut status_rx = handle.subscribe();
    let mut controller =
        PointingController::new(transport.clone(), cfg.controller.clone(), handle.status_sender())?;
    controller.start().await?;
    let mut controller_task = tokio::spawn(controller.run(inputs));

    type PollTask = Pin<Box<dyn Future<Output = Result<Result<()>, tokio::task::JoinError>> + Send>>;
    let mut poll_task: PollTask = if let Some(ms) = cfg.attitude_poll_ms {
        log::info!("polling attitude every {ms} msec");
        Box::pin(tokio::spawn(poll_attitude(
            transport.clone(),
            Duration::from_millis(ms),
            handle.status_sender(),
        )))
    } else {
        Box::pin(pending()) // future never completes
    };

    let mut operator_rx = FramedRead::new(tokio::io::stdin(), JsonLinesCodec::new());
    let mut status_out = FramedWrite::new(tokio::io::stdout(), JsonLinesCodec::new());

    // Main loop.
    loop {
        tokio::select! {
            cmd = operator_rx.next() => {
                match cmd {
                    Some(cmd) => handle.send(cmd?).await?,
                    None => {
                        log::info!("operator input closed, quitting");
                        break;
                    }
                }
            }
            evt = status_rx.recv() => {
                match evt {
                    Ok(evt) => status_out.send(evt).await?,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("skipped {n} status events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            res = &mut controller_task => {
                res?;
                eyre::bail!("controller stopped unexpectedly");
            }
            res = &mut poll_task => {
                res??;
                break;
            }
        }
    }

    drop(handle);
    controller_task.await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::var_os("RUST_LOG").is_none() {
        let envstr = format!("{}=info,info", env!("CARGO_PKG_NAME")).replace('-', "_");
        std::env::set_var("RUST_LOG", envstr);
    }

    let cli = Cli::parse();
    init_logging(cli.log_dir.as_deref())?;

    let cfg = load_config(&cli)?;
    let cfg_pretty = serde_yaml::to_string(&cfg)?;
    log::info!("configuration:\n{cfg_pretty}");

    match cli.command.unwrap_or_default() {
        Commands::ShowConfig => {
            print!("{cfg_pretty}");
        }
        Commands::Home => {
            let transport = open_transport(&cfg)?;
            let mut controller =
                PointingController::new(transport, cfg.controller, broadcast::channel(1).0)?;
            controller.home().await?;
        }
        Commands::SetAngles { yaw, pitch } => {
            let transport = open_transport(&cfg)?;
            let mut controller =
                PointingController::new(transport, cfg.controller, broadcast::channel(1).0)?;
            controller
                .set_angles(GimbalAngles::new(yaw, pitch))
                .await
                .with_context(|| format!("setting yaw {yaw}, pitch {pitch}"))?;
        }
        Commands::Attitude => {
            let transport = open_transport(&cfg)?;
            let report = transport.request_attitude().await?;
            println!("{}", serde_json::to_string(&attitude_sample(&report))?);
        }
        Commands::Run => run(cfg).await?,
    }
    Ok(())
}
