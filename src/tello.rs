use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::command::{
    expect_ok, parse_number, Command, FlipDirection, MANOEUVRE_TIMEOUT, MOVE_TIMEOUT,
};
use crate::errors::{Result, TelloError};
use crate::events::{EventBus, EventKind, TelloEvent};
use crate::options::TelloOptions;
use crate::sequencer::{CommandSequencer, ResponseListener};
use crate::state::{LatestState, StateListener, TelloState};
use crate::video::VideoListener;

/// Where the drone connection is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Starting,
    Running,
    Closing,
}

/// Local addresses of a running connection's sockets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalAddresses {
    pub command: SocketAddr,
    pub state: SocketAddr,
    pub video: Option<SocketAddr>,
}

#[derive(Debug)]
struct Session {
    scope: CancellationToken,
    addresses: LocalAddresses,
    state: StateListener,
    video: Option<VideoListener>,
    responses: ResponseListener,
}

/// Scope of the current attempt or session, and the session once running.
/// Every state change happens with this locked.
#[derive(Debug, Default)]
struct Lifecycle {
    scope: Option<CancellationToken>,
    session: Option<Session>,
}

/// A Tello drone.
///
/// `start` opens the command, state and video sockets and puts the drone in
/// command mode, `close` tears everything down again. A closed drone can be
/// started again. Cloning gives another handle to the same drone, eg to send
/// an emergency stop from another task.
#[derive(Clone)]
pub struct Tello {
    options: Arc<TelloOptions>,
    lifecycle: Arc<Mutex<Lifecycle>>,
    status: Arc<watch::Sender<LifecycleState>>,
    sequencer: Arc<CommandSequencer>,
    latest: LatestState,
    events: EventBus,
}

impl Default for Tello {
    fn default() -> Self {
        Self::new()
    }
}

impl Tello {
    pub fn new() -> Self {
        Self::with_options(TelloOptions::default())
    }

    pub fn with_options(options: TelloOptions) -> Self {
        Self {
            options: Arc::new(options),
            lifecycle: Arc::new(Mutex::new(Lifecycle::default())),
            status: Arc::new(watch::channel(LifecycleState::Idle).0),
            sequencer: Arc::new(CommandSequencer::default()),
            latest: LatestState::default(),
            events: EventBus::new(),
        }
    }

    /// Connects to the drone. Does nothing if already started.
    ///
    /// On failure everything opened so far is closed again and the drone is
    /// left idle, ready for another attempt. A `close` while starting cancels
    /// the attempt, which then fails with [`TelloError::Cancelled`].
    pub async fn start(&self) -> Result<()> {
        let scope = {
            let mut lifecycle = self.lifecycle.lock().await;
            if self.lifecycle() != LifecycleState::Idle {
                return Ok(());
            }

            info!("[Tello] STARTING");
            let scope = CancellationToken::new();
            lifecycle.scope = Some(scope.clone());
            self.set_lifecycle(LifecycleState::Starting);
            self.events.start(&scope);
            scope
        };

        // not locked, so `close` can cancel the handshake
        let opened = self.open(&scope).await;

        let mut lifecycle = self.lifecycle.lock().await;
        let err = match opened {
            Ok(session) if !scope.is_cancelled() => {
                lifecycle.session = Some(session);
                self.set_lifecycle(LifecycleState::Running);
                info!("[Tello] CONNECTED");
                return Ok(());
            }
            Ok(session) => {
                shut_down(session).await;
                TelloError::Cancelled
            }
            Err(err) => err,
        };

        warn!("[Tello] start failed: {err}");
        scope.cancel();
        self.sequencer.detach();
        self.events.stop().await;
        if self.lifecycle() == LifecycleState::Closing {
            self.events.reset();
        }
        lifecycle.scope = None;
        self.set_lifecycle(LifecycleState::Idle);
        Err(err)
    }

    async fn open(&self, scope: &CancellationToken) -> Result<Session> {
        let options = &self.options;

        let state = StateListener::start_listening(
            options.state_bind,
            self.latest.clone(),
            self.events.clone(),
            scope.clone(),
        )
        .await?;

        let video = if options.video {
            match VideoListener::start_listening(options.video_bind, self.events.clone(), scope.clone())
                .await
            {
                Ok(video) => Some(video),
                Err(err) => {
                    scope.cancel();
                    state.stop_listening().await;
                    return Err(err);
                }
            }
        } else {
            None
        };

        let (sock, command_address) = match connect(options).await {
            Ok((sock, address)) => (Arc::new(sock), address),
            Err(err) => {
                scope.cancel();
                state.stop_listening().await;
                if let Some(video) = video {
                    video.stop_listening().await;
                }
                return Err(err);
            }
        };

        let addresses = LocalAddresses {
            command: command_address,
            state: state.local_address(),
            video: video.as_ref().map(|v| v.local_address()),
        };

        self.sequencer.attach(sock.clone(), scope.clone());
        let responses = ResponseListener::start_listening(sock, self.sequencer.clone(), scope.clone());

        let session = Session { scope: scope.clone(), addresses, state, video, responses };

        info!("[Tello] putting drone in command mode...");
        let handshake = Command::new("command", options.default_timeout);
        if let Err(err) = self.sequencer.request(&handshake, expect_ok).await {
            shut_down(session).await;
            return Err(err);
        }

        Ok(session)
    }

    /// Disconnects from the drone, failing any command still waiting for its
    /// response and dropping every event subscription. Cancels a `start` in
    /// progress. Does nothing if not started.
    pub async fn close(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if let Some(session) = lifecycle.session.take() {
            info!("[Tello] CLOSING");
            self.set_lifecycle(LifecycleState::Closing);

            // listeners first, so nothing is dispatched once the bus is reset
            shut_down(session).await;
            self.sequencer.detach();
            self.events.stop().await;
            self.events.reset();

            lifecycle.scope = None;
            self.set_lifecycle(LifecycleState::Idle);
            info!("[Tello] CLOSED");
            return;
        }

        if let Some(scope) = &lifecycle.scope {
            info!("[Tello] CLOSING while starting");
            self.set_lifecycle(LifecycleState::Closing);
            scope.cancel();
        }
        drop(lifecycle);

        // the cancelled `start` finishes tearing down
        let mut status = self.status.subscribe();
        loop {
            let state = *status.borrow_and_update();
            if state == LifecycleState::Idle || status.changed().await.is_err() {
                break;
            }
        }
    }

    pub fn lifecycle(&self) -> LifecycleState {
        *self.status.borrow()
    }

    fn set_lifecycle(&self, state: LifecycleState) {
        self.status.send_replace(state);
    }

    /// Local socket addresses, while running.
    pub async fn local_addresses(&self) -> Option<LocalAddresses> {
        self.lifecycle.lock().await.session.as_ref().map(|s| s.addresses)
    }

    /// The most recently received state.
    pub fn state(&self) -> TelloState {
        self.latest.get()
    }

    /// The most recent response received on the command socket.
    pub fn last_response(&self) -> Option<String> {
        self.sequencer.last_response()
    }

    /// Number of commands currently being sent or waiting for a response.
    pub fn commands_in_flight(&self) -> usize {
        self.sequencer.in_flight()
    }

    /// Subscribes to events. Subscriptions last until `close`.
    pub fn on<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&TelloEvent) + Send + Sync + 'static,
    {
        self.events.on(kind, handler);
    }

    pub fn on_state<F: Fn(TelloState) + Send + Sync + 'static>(&self, handler: F) {
        self.events.on_state(handler);
    }

    pub fn on_video_packet<F: Fn(&[u8]) + Send + Sync + 'static>(&self, handler: F) {
        self.events.on_video_packet(handler);
    }

    pub fn on_take_off<F: Fn() + Send + Sync + 'static>(&self, handler: F) {
        self.events.on_take_off(handler);
    }

    pub fn on_land<F: Fn() + Send + Sync + 'static>(&self, handler: F) {
        self.events.on_land(handler);
    }

    /// Sends a command the drone doesn't acknowledge.
    pub async fn send(&self, command: &Command) -> Result<()> {
        self.sequencer.send(command).await
    }

    /// Sends a command, passing its response to `handler`.
    pub async fn request<T>(
        &self,
        command: &Command,
        handler: impl FnOnce(&str) -> Result<T>,
    ) -> Result<T> {
        self.sequencer.request(command, handler).await
    }

    async fn ok(&self, command: Command) -> Result<()> {
        self.request(&command, expect_ok).await
    }

    async fn ok_then(&self, command: Command, event: TelloEvent) -> Result<()> {
        self.request(&command, |response| {
            expect_ok(response)?;
            self.events.dispatch(event);
            Ok(())
        })
        .await
    }

    fn command(&self, text: impl Into<String>) -> Command {
        Command::new(text, self.options.default_timeout)
    }

    /// Take off and hover.
    pub async fn take_off(&self) -> Result<()> {
        self.ok_then(Command::new("takeoff", MANOEUVRE_TIMEOUT), TelloEvent::TakeOff).await
    }

    /// Land. Cuts in front of queued commands, unless taking off.
    pub async fn land(&self) -> Result<()> {
        let command = Command::new("land", MANOEUVRE_TIMEOUT).canceller();
        self.ok_then(command, TelloEvent::Land).await
    }

    /// Stop all motors immediately. The drone will drop like a brick.
    pub async fn emergency_stop(&self) -> Result<()> {
        self.send(&self.command("emergency").canceller()).await
    }

    /// Stop moving and hover.
    pub async fn stop_and_hover(&self) -> Result<()> {
        self.ok(self.command("stop")).await
    }

    /// Move up by the given distance, in cm (20-500).
    pub async fn move_up(&self, distance: u32) -> Result<()> {
        self.ok(Command::new(format!("up {distance}"), MOVE_TIMEOUT)).await
    }

    pub async fn move_down(&self, distance: u32) -> Result<()> {
        self.ok(Command::new(format!("down {distance}"), MOVE_TIMEOUT)).await
    }

    pub async fn move_left(&self, distance: u32) -> Result<()> {
        self.ok(Command::new(format!("left {distance}"), MOVE_TIMEOUT)).await
    }

    pub async fn move_right(&self, distance: u32) -> Result<()> {
        self.ok(Command::new(format!("right {distance}"), MOVE_TIMEOUT)).await
    }

    pub async fn move_forward(&self, distance: u32) -> Result<()> {
        self.ok(Command::new(format!("forward {distance}"), MOVE_TIMEOUT)).await
    }

    pub async fn move_back(&self, distance: u32) -> Result<()> {
        self.ok(Command::new(format!("back {distance}"), MOVE_TIMEOUT)).await
    }

    /// Turn clockwise by the given angle, in degrees (1-360).
    pub async fn turn_clockwise(&self, degrees: u32) -> Result<()> {
        self.ok(Command::new(format!("cw {degrees}"), MOVE_TIMEOUT)).await
    }

    pub async fn turn_counterclockwise(&self, degrees: u32) -> Result<()> {
        self.ok(Command::new(format!("ccw {degrees}"), MOVE_TIMEOUT)).await
    }

    pub async fn flip(&self, direction: FlipDirection) -> Result<()> {
        let command = Command::new(format!("flip {}", direction.code()), MANOEUVRE_TIMEOUT);
        self.ok(command).await
    }

    pub async fn flip_left(&self) -> Result<()> {
        self.flip(FlipDirection::Left).await
    }

    pub async fn flip_right(&self) -> Result<()> {
        self.flip(FlipDirection::Right).await
    }

    pub async fn flip_forward(&self) -> Result<()> {
        self.flip(FlipDirection::Forward).await
    }

    pub async fn flip_back(&self) -> Result<()> {
        self.flip(FlipDirection::Back).await
    }

    /// Fly to the given position relative to the current one, in cm, at the
    /// given speed in cm/s.
    pub async fn go_to(&self, x: i32, y: i32, z: i32, speed: u32) -> Result<()> {
        self.ok(Command::new(format!("go {x} {y} {z} {speed}"), MOVE_TIMEOUT)).await
    }

    /// Fly a curve through the two given points, relative to the current
    /// position, at the given speed in cm/s.
    #[allow(clippy::too_many_arguments)]
    pub async fn curve(
        &self,
        x1: i32,
        y1: i32,
        z1: i32,
        x2: i32,
        y2: i32,
        z2: i32,
        speed: u32,
    ) -> Result<()> {
        let text = format!("curve {x1} {y1} {z1} {x2} {y2} {z2} {speed}");
        self.ok(Command::new(text, MOVE_TIMEOUT)).await
    }

    /// Remote control, each value in -100..=100. Not acknowledged by the
    /// drone.
    pub async fn remote_control(
        &self,
        left_right: i8,
        forwards_backwards: i8,
        up_down: i8,
        yaw: i8,
    ) -> Result<()> {
        let text = format!("rc {left_right} {forwards_backwards} {up_down} {yaw}");
        self.send(&self.command(text)).await
    }

    /// Set the drone's WiFi network name and password.
    pub async fn set_wifi(&self, ssid: &str, password: &str) -> Result<()> {
        self.ok(self.command(format!("wifi {ssid} {password}"))).await
    }

    /// WiFi signal to noise ratio.
    pub async fn wifi(&self) -> Result<i32> {
        self.request(&self.command("wifi?"), parse_number).await
    }

    /// Set the speed, in cm/s (10-100).
    pub async fn set_speed(&self, speed: u32) -> Result<()> {
        self.ok(self.command(format!("speed {speed}"))).await
    }

    /// The current speed setting, in cm/s.
    pub async fn speed(&self) -> Result<i32> {
        self.request(&self.command("speed?"), parse_number).await
    }

    pub async fn start_video(&self) -> Result<()> {
        self.ok(self.command("streamon")).await
    }

    pub async fn stop_video(&self) -> Result<()> {
        self.ok(self.command("streamoff")).await
    }
}

async fn connect(options: &TelloOptions) -> Result<(UdpSocket, SocketAddr)> {
    let local_address = options.command_bind;
    let drone_address = &options.drone_address;
    info!("[Tello] CONNECT {local_address} → {drone_address}");

    let sock = UdpSocket::bind(local_address).await?;
    sock.connect(drone_address).await?;
    let address = sock.local_addr()?;
    Ok((sock, address))
}

/// Stops every listener and waits for it to exit, which closes the sockets.
async fn shut_down(session: Session) {
    session.scope.cancel();
    session.responses.stop_listening().await;
    session.state.stop_listening().await;
    if let Some(video) = session.video {
        video.stop_listening().await;
    }
}
