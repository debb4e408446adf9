//! An event driven client for the Tello drone.
//!
//! Commands go out one at a time over UDP and each waits for the drone's
//! response, while the drone's state messages and video stream are received
//! in the background and published as [`TelloEvent`]s.

mod command;
mod errors;
mod events;
mod options;
mod sequencer;
mod state;
mod tello;
mod video;

pub use command::{Command, FlipDirection, MANOEUVRE_TIMEOUT, MOVE_TIMEOUT};
pub use errors::{Result, TelloError};
pub use events::{EventKind, TelloEvent};
pub use options::{
    TelloOptions, CONTROL_UDP_PORT, DEFAULT_DRONE_HOST, DEFAULT_TIMEOUT, STATE_UDP_PORT,
    VIDEO_UDP_PORT,
};
pub use state::{TelloState, Vector3};
pub use tello::{LifecycleState, LocalAddresses, Tello};
pub use video::{FrameAssembler, TelloVideoFrame, MAX_CHUNK_SIZE, VIDEO_HEIGHT, VIDEO_WIDTH};
