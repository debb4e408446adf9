extern crate tello_link;

use tello_link::{Result, Tello};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

    take_off_and_land().await.unwrap();
}

async fn take_off_and_land() -> Result<()> {
    let drone = Tello::new();
    drone.start().await?;

    drone.on_take_off(|| println!("took off!"));
    drone.on_land(|| println!("landed"));

    drone.take_off().await?;
    drone.turn_clockwise(360).await?;
    drone.land().await?;

    drone.close().await;
    Ok(())
}
