//////////////////////////////////////////////////////////////////////////////
//
// Records the drone's video to example.ts by piping the raw h264 frames into
// ffmpeg, which must be on the PATH. Ctrl-C lands the drone.
//
//////////////////////////////////////////////////////////////////////////////

extern crate tello_link;

use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Mutex;

use anyhow::Context;
use tello_link::Tello;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut ffmpeg = Command::new("ffmpeg")
        .args(["-y", "-i", "pipe:0", "example.ts"])
        .stdin(Stdio::piped())
        .spawn()
        .context("failed to run ffmpeg")?;
    let stdin = Mutex::new(ffmpeg.stdin.take().context("no ffmpeg stdin")?);

    let drone = Tello::new();
    drone.start().await?;

    drone.on_video_packet(move |data| {
        if let Err(err) = stdin.lock().unwrap().write_all(data) {
            tracing::error!("writing video packet failed: {err}");
        }
    });
    drone.on_take_off(|| tracing::warn!("drone has taken off!"));

    let lander = drone.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            if let Err(err) = lander.land().await {
                tracing::error!("landing failed: {err}");
            }
        }
    });

    drone.start_video().await?;
    drone.take_off().await?;
    drone.flip_right().await?;
    tracing::info!("state is: {:?}", drone.state());
    drone.land().await?;
    drone.stop_video().await?;

    // dropping the subscription closes ffmpeg's stdin
    drone.close().await;
    ffmpeg.wait()?;

    Ok(())
}
