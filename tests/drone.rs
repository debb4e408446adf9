use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tello_link::{
    Command, FlipDirection, LifecycleState, TelloError, Tello, TelloOptions, TelloState, Vector3,
};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

const STATE_MESSAGE: &str = "pitch:8;roll:9;yaw:10;vgx:11;vgy:12;vgz:13;templ:14;temph:15;tof:16;h:17;bat:18;baro:19.1;time:20;agx:21.1;agy:22.1;agz:23.1;";

/// Stands in for the drone's command port.
struct FakeDrone {
    address: SocketAddr,
    received: Arc<Mutex<Vec<String>>>,
    silent: Arc<AtomicBool>,
}

impl FakeDrone {
    async fn start() -> anyhow::Result<Self> {
        let sock = UdpSocket::bind("127.0.0.1:0").await?;
        let address = sock.local_addr()?;
        let received = Arc::new(Mutex::new(Vec::new()));
        let silent = Arc::new(AtomicBool::new(false));

        let log = received.clone();
        let quiet = silent.clone();
        tokio::spawn(async move {
            let mut buf = vec![0; 2048];
            while let Ok((n, from)) = sock.recv_from(&mut buf).await {
                let command = String::from_utf8_lossy(&buf[..n]).to_string();
                log.lock().unwrap().push(command.clone());

                if quiet.load(Ordering::SeqCst) {
                    continue;
                }

                let response = match command.as_str() {
                    "command" | "takeoff" | "land" | "stop" | "up 1" | "down 1" | "left 1"
                    | "right 1" | "forward 1" | "back 1" | "cw 1" | "ccw 1" | "flip l"
                    | "go 1 2 3 4" | "curve 1 2 3 4 5 6 7" | "wifi 1 2" | "speed 1"
                    | "streamon" | "streamoff" => "ok",
                    "speed?" => "100.0",
                    "wifi?" => "100",
                    _ => continue,
                };
                let _ = sock.send_to(response.as_bytes(), from).await;
            }
        });

        Ok(Self { address, received, silent })
    }

    fn options(&self) -> TelloOptions {
        let local: SocketAddr = "127.0.0.1:0".parse().unwrap();
        TelloOptions::default()
            .with_drone_address(self.address.to_string())
            .with_command_bind(local)
            .with_state_bind(local)
            .with_video_bind(local)
    }

    fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    fn set_silent(&self, silent: bool) {
        self.silent.store(silent, Ordering::SeqCst);
    }
}

fn expected_state() -> TelloState {
    TelloState {
        pitch: 8,
        roll: 9,
        yaw: 10,
        velocity: Vector3 { x: 11, y: 12, z: 13 },
        temperature_low: 14,
        temperature_high: 15,
        time_of_flight: 16,
        height: 17,
        battery: 18,
        barometer: 19.1,
        motor_time: 20,
        acceleration: Vector3 { x: 21.1, y: 22.1, z: 23.1 },
    }
}

#[tokio::test]
async fn flies_through_every_command() -> anyhow::Result<()> {
    let fake = FakeDrone::start().await?;
    let drone = Tello::with_options(fake.options());

    drone.start().await?;
    drone.start().await?;
    assert_eq!(drone.lifecycle(), LifecycleState::Running);

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let tx = events_tx.clone();
    drone.on_take_off(move || tx.send("take.off").unwrap());
    let tx = events_tx.clone();
    drone.on_land(move || tx.send("land").unwrap());

    drone.emergency_stop().await?;
    drone.take_off().await?;
    drone.land().await?;
    drone.stop_and_hover().await?;
    drone.move_up(1).await?;
    drone.move_down(1).await?;
    drone.move_left(1).await?;
    drone.move_right(1).await?;
    drone.move_forward(1).await?;
    drone.move_back(1).await?;
    drone.turn_clockwise(1).await?;
    drone.turn_counterclockwise(1).await?;
    drone.flip(FlipDirection::Left).await?;
    drone.go_to(1, 2, 3, 4).await?;
    drone.curve(1, 2, 3, 4, 5, 6, 7).await?;
    drone.remote_control(1, 2, 3, 4).await?;
    drone.set_wifi("1", "2").await?;
    drone.set_speed(1).await?;
    drone.start_video().await?;
    drone.stop_video().await?;
    assert_eq!(drone.wifi().await?, 100);
    assert_eq!(drone.speed().await?, 100);

    assert_eq!(
        fake.received(),
        vec![
            "command", "emergency", "takeoff", "land", "stop", "up 1", "down 1", "left 1",
            "right 1", "forward 1", "back 1", "cw 1", "ccw 1", "flip l", "go 1 2 3 4",
            "curve 1 2 3 4 5 6 7", "rc 1 2 3 4", "wifi 1 2", "speed 1", "streamon", "streamoff",
            "wifi?", "speed?",
        ]
    );

    assert_eq!(timeout(WAIT, events_rx.recv()).await?, Some("take.off"));
    assert_eq!(timeout(WAIT, events_rx.recv()).await?, Some("land"));
    assert_eq!(drone.last_response().as_deref(), Some("100.0"));
    assert_eq!(drone.commands_in_flight(), 0);

    drone.close().await;
    Ok(())
}

#[tokio::test]
async fn publishes_state_and_video() -> anyhow::Result<()> {
    let fake = FakeDrone::start().await?;
    let drone = Tello::with_options(fake.options());
    drone.start().await?;

    let (state_tx, mut state_rx) = mpsc::unbounded_channel();
    drone.on_state(move |state| state_tx.send(state).unwrap());
    let (video_tx, mut video_rx) = mpsc::unbounded_channel();
    drone.on_video_packet(move |data| video_tx.send(data.to_vec()).unwrap());

    let addresses = drone.local_addresses().await.expect("running");
    let sender = UdpSocket::bind("127.0.0.1:0").await?;

    sender.send_to(b"not a state message", addresses.state).await?;
    sender.send_to(STATE_MESSAGE.as_bytes(), addresses.state).await?;
    sender.send_to(b"packet", addresses.video.expect("video enabled")).await?;

    assert_eq!(timeout(WAIT, state_rx.recv()).await?, Some(expected_state()));
    assert_eq!(drone.state(), expected_state());
    assert_eq!(timeout(WAIT, video_rx.recv()).await?, Some(b"packet".to_vec()));

    drone.close().await;
    Ok(())
}

#[tokio::test]
async fn commands_time_out_without_response() -> anyhow::Result<()> {
    let fake = FakeDrone::start().await?;
    let drone = Tello::with_options(fake.options());
    drone.start().await?;

    fake.set_silent(true);
    let command = Command::new("command", Duration::from_millis(1));
    let result = drone.request(&command, |_| Ok(())).await;
    assert!(matches!(result, Err(TelloError::Timeout(_))));
    assert_eq!(drone.commands_in_flight(), 0);
    fake.set_silent(false);

    drone.close().await;
    Ok(())
}

#[tokio::test]
async fn close_cancels_waiting_commands() -> anyhow::Result<()> {
    let fake = FakeDrone::start().await?;
    let drone = Tello::with_options(fake.options());
    drone.start().await?;
    fake.set_silent(true);

    let waiting = {
        let drone = drone.clone();
        tokio::spawn(async move { drone.take_off().await })
    };
    while drone.commands_in_flight() == 0 {
        tokio::task::yield_now().await;
    }

    drone.close().await;
    assert!(matches!(timeout(WAIT, waiting).await??, Err(TelloError::Cancelled)));
    Ok(())
}

#[tokio::test]
async fn state_received_while_closing_is_not_delivered_after_restart() -> anyhow::Result<()> {
    let fake = FakeDrone::start().await?;
    let drone = Tello::with_options(fake.options());
    drone.start().await?;

    let state_address = drone.local_addresses().await.expect("running").state;
    let sender = UdpSocket::bind("127.0.0.1:0").await?;
    let flood = tokio::spawn(async move {
        while sender.send_to(STATE_MESSAGE.as_bytes(), state_address).await.is_ok() {
            tokio::task::yield_now().await;
        }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    drone.close().await;
    flood.abort();

    let (tx, mut rx) = mpsc::unbounded_channel();
    drone.on_state(move |state| tx.send(state).unwrap());
    drone.start().await?;

    assert!(timeout(Duration::from_millis(200), rx.recv()).await.is_err());

    drone.close().await;
    Ok(())
}

#[tokio::test]
async fn restarts_after_close() -> anyhow::Result<()> {
    let fake = FakeDrone::start().await?;
    let drone = Tello::with_options(fake.options());

    drone.start().await?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    drone.on_take_off(move || tx.send(()).unwrap());
    drone.close().await;
    drone.close().await;

    assert_eq!(drone.lifecycle(), LifecycleState::Idle);
    assert!(matches!(drone.take_off().await, Err(TelloError::NotConnected)));

    drone.start().await?;
    assert_eq!(drone.lifecycle(), LifecycleState::Running);
    drone.take_off().await?;

    // subscriptions from the previous session were dropped on close
    drone.close().await;
    assert_eq!(rx.recv().await, None);

    assert_eq!(fake.received(), vec!["command", "command", "takeoff"]);
    Ok(())
}
