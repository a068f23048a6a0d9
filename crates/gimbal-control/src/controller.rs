use std::{sync::Arc, time::Duration};

use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{broadcast, mpsc, watch},
    time::{Instant, Interval, MissedTickBehavior},
};

use gimbal_core::{
    describe, find_confirmed, ConfigError, select_at, AttitudeSample, ControlMode, ControllerConfig,
    GimbalAngles, JogDirection, LostTargetPolicy, OperatorCommand, RangeError, Selection,
    StatusEvent, TargetHint, Track, TrackId,
};
use gimbal_proto::{AttitudeReport, OutgoingCommand};
use gimbal_serial::{Transport, TransportError};

use crate::correction::{jog_target, plan_correction, Correction};

#[derive(Error, Debug)]
pub enum ControlError {
    #[error(transparent)]
    Range(#[from] RangeError),
    #[error("invalid controller configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("controller is not running")]
    Stopped,
}

pub fn attitude_sample(report: &AttitudeReport) -> AttitudeSample {
    AttitudeSample {
        timestamp: chrono::Local::now(),
        yaw: report.angles.yaw,
        pitch: report.angles.pitch,
        roll: report.angles.roll,
        yaw_rate: report.rates.yaw,
        pitch_rate: report.rates.pitch,
        roll_rate: report.rates.roll,
        checksum_ok: report.checksum_ok(),
    }
}

fn periodic(period: Duration) -> Interval {
    // first tick one period from now, not immediately
    let mut timer = tokio::time::interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

/// Resolves at the next tick, or never if the timer is not running.
async fn next_tick(timer: &mut Option<Interval>) -> Instant {
    match timer {
        Some(timer) => timer.tick().await,
        None => std::future::pending().await,
    }
}

/// Owns the commanded gimbal angles and decides what gets sent to the gimbal.
///
/// All state lives here and is only touched from [PointingController::run]
/// (or directly, when driven without the actor loop), so jog ticks, tracking
/// ticks and operator commands are handled strictly one after another.
pub struct PointingController<P> {
    transport: Transport<P>,
    cfg: ControllerConfig,
    state: GimbalAngles,
    jog: Option<JogDirection>,
    tracking: bool,
    selected: Option<TrackId>,
    target: TargetHint,
    tracks: Vec<Track>,
    last_info: Option<String>,
    reported_mode: ControlMode,
    jog_timer: Option<Interval>,
    track_timer: Option<Interval>,
    status_tx: broadcast::Sender<StatusEvent>,
}

impl<P: AsyncRead + AsyncWrite + Unpin + Send> PointingController<P> {
    /// Fails if `cfg` has zero periods or unusable limits.
    pub fn new(
        transport: Transport<P>,
        cfg: ControllerConfig,
        status_tx: broadcast::Sender<StatusEvent>,
    ) -> Result<Self, ControlError> {
        cfg.validate()?;
        Ok(Self {
            transport,
            cfg,
            state: GimbalAngles::ZERO,
            jog: None,
            tracking: false,
            selected: None,
            target: None,
            tracks: Vec::new(),
            last_info: None,
            reported_mode: ControlMode::Idle,
            jog_timer: None,
            track_timer: None,
            status_tx,
        })
    }

    pub fn state(&self) -> GimbalAngles {
        self.state
    }

    pub fn mode(&self) -> ControlMode {
        if self.tracking {
            ControlMode::AutoTracking
        } else if self.jog.is_some() {
            ControlMode::ManualJog
        } else {
            ControlMode::Idle
        }
    }

    pub fn selected(&self) -> Option<TrackId> {
        self.selected
    }

    pub fn target(&self) -> TargetHint {
        self.target
    }

    fn emit(&self, evt: StatusEvent) {
        // nobody listening is fine
        self.status_tx.send(evt).ok();
    }

    fn report_mode(&mut self) {
        let mode = self.mode();
        if mode != self.reported_mode {
            tracing::info!("mode {:?} -> {:?}", self.reported_mode, mode);
            self.emit(StatusEvent::ModeChanged {
                from: self.reported_mode,
                to: mode,
            });
            self.reported_mode = mode;
        }
    }

    async fn send_angles(&self, wire: GimbalAngles) -> Result<(), ControlError> {
        self.transport
            .send_command(&OutgoingCommand::SetAttitude {
                yaw: wire.yaw,
                pitch: wire.pitch,
            })
            .await?;
        Ok(())
    }

    fn commit(&mut self, angles: GimbalAngles) {
        self.state = angles;
        self.emit(StatusEvent::AnglesCommanded(angles));
    }

    /// Startup actions configured in [ControllerConfig].
    pub async fn start(&mut self) -> Result<(), ControlError> {
        if self.cfg.center_on_start {
            self.send_angles(GimbalAngles::ZERO).await?;
            self.commit(GimbalAngles::ZERO);
        }
        if self.cfg.sync_attitude_on_start {
            match self.transport.request_attitude().await {
                Ok(report) => {
                    let seeded = self.cfg.limits.clamp(GimbalAngles::new(
                        report.angles.yaw,
                        report.angles.pitch,
                    ));
                    tracing::info!("seeding angles from attitude: {seeded:?}");
                    self.state = seeded;
                    self.emit(StatusEvent::Attitude(attitude_sample(&report)));
                }
                Err(e) => {
                    tracing::warn!("could not read initial attitude: {e}");
                }
            }
        }
        Ok(())
    }

    pub fn jog_start(&mut self, direction: JogDirection) {
        tracing::debug!("jog {direction:?}");
        self.jog = Some(direction);
        self.jog_timer = Some(periodic(Duration::from_millis(self.cfg.jog_period_ms)));
        self.report_mode();
    }

    pub fn jog_stop(&mut self) {
        self.jog = None;
        self.jog_timer = None;
        self.report_mode();
    }

    /// One jog step. Sends every tick, even when clamped at a limit.
    pub async fn jog_tick(&mut self) -> Result<(), ControlError> {
        let Some(direction) = self.jog else {
            return Ok(());
        };
        let next = jog_target(
            self.state,
            direction,
            self.cfg.jog_step_deg,
            &self.cfg.limits,
        );
        self.send_angles(next).await?;
        self.commit(next);
        Ok(())
    }

    /// Enters auto-tracking and runs the first correction. Returns false
    /// (and does nothing) if no target is selected.
    pub async fn start_tracking(&mut self) -> Result<bool, ControlError> {
        if self.selected.is_none() {
            tracing::info!("no target selected, not tracking");
            return Ok(false);
        }
        self.tracking = true;
        self.track_timer = Some(periodic(Duration::from_millis(self.cfg.track_period_ms)));
        self.emit(StatusEvent::TrackingStatus(true));
        self.report_mode();
        self.correction_cycle().await?;
        Ok(true)
    }

    pub fn stop_tracking(&mut self) {
        self.tracking = false;
        self.track_timer = None;
        self.selected = None;
        self.target = None;
        self.emit(StatusEvent::TrackingStatus(false));
        self.emit(StatusEvent::TargetSelected(false));
        self.report_mode();
    }

    pub async fn correction_cycle(&mut self) -> Result<(), ControlError> {
        if !self.tracking {
            return Ok(());
        }
        match plan_correction(self.state, self.target, &self.cfg) {
            Correction::TargetLost => match self.cfg.on_target_lost {
                LostTargetPolicy::Home => {
                    tracing::debug!("target lost, recentering");
                    self.transport.send_command(&OutgoingCommand::Center).await?;
                }
                LostTargetPolicy::Hold => {
                    tracing::debug!("target lost, holding");
                }
            },
            Correction::Centered | Correction::Unchanged => {}
            Correction::Move(next) => {
                self.send_angles(next.negated()).await?;
                self.commit(next);
            }
        }
        Ok(())
    }

    pub async fn home(&mut self) -> Result<(), ControlError> {
        self.transport.send_command(&OutgoingCommand::Center).await?;
        self.commit(GimbalAngles::ZERO);
        Ok(())
    }

    /// Moves to explicit angles. Out-of-range requests are rejected and leave
    /// the state untouched.
    pub async fn set_angles(&mut self, angles: GimbalAngles) -> Result<(), ControlError> {
        let angles = self.cfg.limits.check(angles)?;
        self.send_angles(angles).await?;
        self.commit(angles);
        Ok(())
    }

    fn apply_selection(&mut self, selection: Option<Selection>) {
        match selection {
            Some(sel) => {
                tracing::info!("selected track {}", sel.id);
                self.selected = Some(sel.id);
                self.target = Some(sel.center);
            }
            None => {
                self.selected = None;
                self.target = None;
            }
        }
        self.emit(StatusEvent::TargetSelected(self.selected.is_some()));
    }

    /// Selects the track under a clicked pixel. A miss clears the selection.
    pub fn select_at(&mut self, x: i32, y: i32) -> Option<Selection> {
        let sel = select_at(&self.tracks, x, y);
        self.apply_selection(sel);
        sel
    }

    pub fn select_track(&mut self, id: TrackId) -> Option<Selection> {
        let sel = find_confirmed(&self.tracks, id).map(|t| Selection {
            id: t.id,
            center: t.bbox.center_point(),
        });
        self.apply_selection(sel);
        sel
    }

    /// New detector output. Refreshes the target position from the selected
    /// track; if that track is gone the target is unknown until it returns.
    pub fn update_tracks(&mut self, tracks: Vec<Track>) {
        self.tracks = tracks;
        let selected = self
            .selected
            .and_then(|id| find_confirmed(&self.tracks, id));
        self.target = selected.map(|t| t.bbox.center_point());

        let info = describe(selected);
        if self.last_info.as_ref() != Some(&info) {
            self.last_info = Some(info.clone());
            self.emit(StatusEvent::TargetInfo(info));
        }
    }

    /// Last write wins.
    pub fn set_target(&mut self, hint: TargetHint) {
        self.target = hint;
    }

    /// Reads the attitude back. Does not change the commanded angles.
    pub async fn request_attitude(&mut self) -> Result<AttitudeSample, ControlError> {
        let report = self.transport.request_attitude().await?;
        let sample = attitude_sample(&report);
        self.emit(StatusEvent::Attitude(sample.clone()));
        Ok(sample)
    }

    pub async fn handle_command(&mut self, cmd: OperatorCommand) -> Result<(), ControlError> {
        use OperatorCommand as C;
        match cmd {
            C::JogStart { direction } => self.jog_start(direction),
            C::JogStop => self.jog_stop(),
            C::StartTracking => {
                self.start_tracking().await?;
            }
            C::StopTracking => self.stop_tracking(),
            C::Home => self.home().await?,
            C::SetAngles { yaw, pitch } => self.set_angles(GimbalAngles::new(yaw, pitch)).await?,
            C::Tracks { tracks } => self.update_tracks(tracks),
            C::Click { x, y } => {
                self.select_at(x, y);
            }
            C::Target(hint) => self.set_target(hint),
            C::SelectTrack { id } => {
                self.select_track(id);
            }
            C::Attitude => {
                self.request_attitude().await?;
            }
        }
        Ok(())
    }

    fn report_failure(&self, what: &str, e: ControlError) {
        tracing::error!("{what} failed: {e}");
        self.emit(StatusEvent::CommandFailed(format!("{what}: {e}")));
    }

    /// Runs the controller until every command sender is dropped. Failures of
    /// individual commands and ticks are reported, not fatal.
    pub async fn run(mut self, inputs: ControllerInputs) {
        let ControllerInputs {
            mut commands,
            mut hints,
        } = inputs;
        let mut hints_open = true;

        loop {
            tokio::select! {
                cmd = commands.recv() => {
                    let Some(cmd) = cmd else {
                        break;
                    };
                    let what = format!("{cmd:?}");
                    if let Err(e) = self.handle_command(cmd).await {
                        self.report_failure(&what, e);
                    }
                }
                res = hints.changed(), if hints_open => {
                    if res.is_err() {
                        hints_open = false;
                    } else {
                        let hint = *hints.borrow_and_update();
                        self.set_target(hint);
                    }
                }
                _ = next_tick(&mut self.jog_timer) => {
                    if let Err(e) = self.jog_tick().await {
                        self.report_failure("jog tick", e);
                    }
                }
                _ = next_tick(&mut self.track_timer) => {
                    if let Err(e) = self.correction_cycle().await {
                        self.report_failure("tracking tick", e);
                    }
                }
            }
        }
        tracing::debug!("controller stopped");
    }
}

/// Receiving ends of a [ControllerHandle], consumed by
/// [PointingController::run].
pub struct ControllerInputs {
    commands: mpsc::Receiver<OperatorCommand>,
    hints: watch::Receiver<TargetHint>,
}

#[derive(Clone)]
pub struct ControllerHandle {
    cmd_tx: mpsc::Sender<OperatorCommand>,
    hint_tx: Arc<watch::Sender<TargetHint>>,
    status_tx: broadcast::Sender<StatusEvent>,
}

impl ControllerHandle {
    pub fn new(capacity: usize) -> (Self, ControllerInputs) {
        let (cmd_tx, commands) = mpsc::channel(capacity);
        let (hint_tx, hints) = watch::channel(None);
        let status_tx = broadcast::channel(capacity).0;
        (
            Self {
                cmd_tx,
                hint_tx: Arc::new(hint_tx),
                status_tx,
            },
            ControllerInputs { commands, hints },
        )
    }

    /// Queues a command. Target positions bypass the queue, only the newest
    /// one is kept.
    pub async fn send(&self, cmd: OperatorCommand) -> Result<(), ControlError> {
        match cmd {
            OperatorCommand::Target(hint) => {
                self.set_target(hint);
                Ok(())
            }
            cmd => self
                .cmd_tx
                .send(cmd)
                .await
                .map_err(|_| ControlError::Stopped),
        }
    }

    pub fn set_target(&self, hint: TargetHint) {
        self.hint_tx.send_replace(hint);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.status_tx.subscribe()
    }

    pub fn status_sender(&self) -> broadcast::Sender<StatusEvent> {
        self.status_tx.clone()
    }
}
