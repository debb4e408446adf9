use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_DRONE_HOST: &str = "192.168.10.1";

pub const CONTROL_UDP_PORT: u16 = 8889;
pub const STATE_UDP_PORT: u16 = 8890;
pub const VIDEO_UDP_PORT: u16 = 11111;

/// Timeout used by query and configuration commands.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Tello drone connection options.
///
/// The defaults match a drone in AP mode, ie with this machine joined to the
/// drone's own WiFi network.
#[derive(Debug, Clone)]
pub struct TelloOptions {
    pub(crate) drone_address: String,
    pub(crate) command_bind: SocketAddr,
    pub(crate) state_bind: SocketAddr,
    pub(crate) video_bind: SocketAddr,
    pub(crate) video: bool,
    pub(crate) default_timeout: Duration,
}

impl Default for TelloOptions {
    fn default() -> Self {
        Self {
            drone_address: format!("{DEFAULT_DRONE_HOST}:{CONTROL_UDP_PORT}"),
            command_bind: SocketAddr::from(([0, 0, 0, 0], CONTROL_UDP_PORT)),
            state_bind: SocketAddr::from(([0, 0, 0, 0], STATE_UDP_PORT)),
            video_bind: SocketAddr::from(([0, 0, 0, 0], VIDEO_UDP_PORT)),
            video: true,
            default_timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl TelloOptions {
    /// Address ("host:port") the commands are sent to.
    pub fn with_drone_address(mut self, address: impl Into<String>) -> Self {
        self.drone_address = address.into();
        self
    }

    /// Local address of the command socket, which also receives the replies.
    pub fn with_command_bind(mut self, address: SocketAddr) -> Self {
        self.command_bind = address;
        self
    }

    /// Local address the drone's state messages are received on.
    pub fn with_state_bind(mut self, address: SocketAddr) -> Self {
        self.state_bind = address;
        self
    }

    /// Local address the drone's video stream is received on.
    pub fn with_video_bind(mut self, address: SocketAddr) -> Self {
        self.video_bind = address;
        self
    }

    /// Don't open the video socket, for drones that can't stream video.
    pub fn without_video(mut self) -> Self {
        self.video = false;
        self
    }

    /// Timeout for commands that don't move the drone, eg `speed?`.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_target_the_drone_access_point() {
        let options = TelloOptions::default();
        assert_eq!(options.drone_address, "192.168.10.1:8889");
        assert_eq!(options.state_bind.port(), 8890);
        assert_eq!(options.video_bind.port(), 11111);
        assert!(options.video);
        assert_eq!(options.default_timeout, Duration::from_secs(5));
    }

    #[test]
    fn builder_overrides() {
        let local: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let options = TelloOptions::default()
            .with_drone_address("127.0.0.1:9000")
            .with_state_bind(local)
            .without_video()
            .with_default_timeout(Duration::from_millis(10));

        assert_eq!(options.drone_address, "127.0.0.1:9000");
        assert_eq!(options.state_bind, local);
        assert!(!options.video);
        assert_eq!(options.default_timeout, Duration::from_millis(10));
    }
}
