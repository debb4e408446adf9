use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use tokio::net::UdpSocket;
use tokio::{spawn, task};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::errors::{Result, TelloError};
use crate::events::{EventBus, TelloEvent};

const MAX_STATE_MESSAGE_SIZE: usize = 2048;

/// The live state of the drone.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct TelloState {
    /// Attitude, in degrees
    pub pitch: i32,
    pub roll: i32,
    pub yaw: i32,
    /// Speed along each axis, in cm/s
    pub velocity: Vector3<i32>,
    pub temperature_low: i32,
    pub temperature_high: i32,
    /// Time of flight distance, in cm
    pub time_of_flight: i32,
    /// Height, in cm
    pub height: i32,
    /// Battery level, as a percentage
    pub battery: i32,
    /// Barometer height, in cm
    pub barometer: f32,
    /// Time the motors have been running, in seconds
    pub motor_time: i32,
    /// Acceleration along each axis, in g
    pub acceleration: Vector3<f32>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Vector3<T> {
    pub x: T,
    pub y: T,
    pub z: T,
}

impl TelloState {
    /// Parses a state string received from the drone.
    ///
    /// Example message:
    /// "pitch:0;roll:0;yaw:-3;vgx:0;vgy:0;vgz:1;templ:58;temph:60;tof:71;h:50;bat:82;baro:-57.14;time:14;agx:17.00;agy:-4.00;agz:-956.00;"
    ///
    /// All 16 fields must be present, in that order, or the message is
    /// rejected with [`TelloError::MalformedTelemetry`] naming the first
    /// field that didn't match.
    pub fn from_message(s: &str) -> Result<TelloState> {
        let mut fields = Fields(s.trim().split(';'));

        // fields are read in the order they are written here
        let state = TelloState {
            pitch: fields.value("pitch")?,
            roll: fields.value("roll")?,
            yaw: fields.value("yaw")?,
            velocity: Vector3 {
                x: fields.value("vgx")?,
                y: fields.value("vgy")?,
                z: fields.value("vgz")?,
            },
            temperature_low: fields.value("templ")?,
            temperature_high: fields.value("temph")?,
            time_of_flight: fields.value("tof")?,
            height: fields.value("h")?,
            battery: fields.value("bat")?,
            barometer: fields.value("baro")?,
            motor_time: fields.value("time")?,
            acceleration: Vector3 {
                x: fields.value("agx")?,
                y: fields.value("agy")?,
                z: fields.value("agz")?,
            },
        };

        fields.end()?;
        Ok(state)
    }
}

/// `key:value` fields of a state message.
struct Fields<'a>(std::str::Split<'a, char>);

impl Fields<'_> {
    fn value<T: FromStr>(&mut self, key: &'static str) -> Result<T> {
        let f = self.0.next().filter(|f| !f.is_empty()).ok_or_else(|| malformed(key, "missing"))?;
        let (k, v) = f
            .split_once(':')
            .ok_or_else(|| malformed(key, format!("expected key:value, got {f:?}")))?;
        if k != key {
            return Err(malformed(key, format!("unexpected key {k:?}")));
        }
        v.parse::<T>().map_err(|_| malformed(key, format!("invalid value {v:?}")))
    }

    fn end(&mut self) -> Result<()> {
        match self.0.find(|f| !f.is_empty()) {
            Some(extra) => Err(malformed("end", format!("unexpected trailing field {extra:?}"))),
            None => Ok(()),
        }
    }
}

fn malformed(field: &'static str, reason: impl Into<String>) -> TelloError {
    TelloError::MalformedTelemetry { field, reason: reason.into() }
}

/// The most recent state, shared between the listener and callers.
#[derive(Debug, Default, Clone)]
pub(crate) struct LatestState(Arc<Mutex<TelloState>>);

impl LatestState {
    pub(crate) fn get(&self) -> TelloState {
        *self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set(&self, state: TelloState) {
        *self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = state;
    }

    /// Parses one state message, replacing the latest state and publishing
    /// it if it is well formed.
    pub(crate) fn update(&self, raw: &[u8], events: &EventBus) -> Result<TelloState> {
        let message = String::from_utf8_lossy(raw);
        let state = TelloState::from_message(&message)?;
        self.set(state);
        events.dispatch(TelloEvent::State(state));
        Ok(state)
    }
}

#[derive(Debug)]
pub(crate) struct StateListener {
    local_address: SocketAddr,
    task: task::JoinHandle<()>,
}

impl StateListener {
    pub(crate) async fn start_listening(
        address: SocketAddr,
        latest: LatestState,
        events: EventBus,
        scope: CancellationToken,
    ) -> Result<Self> {
        let sock = UdpSocket::bind(address).await?;
        let local_address = sock.local_addr()?;
        info!("[State] START LISTENING at {local_address}");

        let task = spawn(async move {
            let mut buf = vec![0; MAX_STATE_MESSAGE_SIZE];
            loop {
                let received = tokio::select! {
                    _ = scope.cancelled() => break,
                    r = sock.recv(&mut buf) => r,
                };

                match received {
                    Ok(n) => {
                        if let Err(err) = latest.update(&buf[..n], &events) {
                            warn!("[State] dropped state message: {err}");
                        }
                    }
                    Err(_) if scope.is_cancelled() => break,
                    Err(err) => warn!("[State] reading state failed: {err}"),
                }
            }
        });

        Ok(Self { local_address, task })
    }

    pub(crate) fn local_address(&self) -> SocketAddr {
        self.local_address
    }

    /// Waits for the listener to notice the cancelled scope and release its
    /// socket.
    pub(crate) async fn stop_listening(self) {
        info!("[State] STOP LISTENING");
        if let Err(err) = self.task.await {
            warn!("[State] listener task failed: {err}");
        }
    }
}
