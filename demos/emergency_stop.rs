extern crate tello_link;

use tello_link::{Result, Tello};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).init();

    fly().await.unwrap();
}

async fn fly() -> Result<()> {
    let drone = Tello::new();
    drone.start().await?;

    drone.take_off().await?;

    // the emergency stop doesn't wait for the move to finish
    let mover = drone.clone();
    let moving = tokio::spawn(async move { mover.move_forward(200).await });
    drone.emergency_stop().await?; // warning! this will make the drone drop like a brick

    println!("move ended with {:?}", moving.await);

    drone.close().await;
    Ok(())
}
