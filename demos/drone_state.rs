extern crate tello_link;

use std::time::Duration;

use tello_link::{Result, Tello};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

    watch().await.unwrap();
}

async fn watch() -> Result<()> {
    let drone = Tello::new();
    drone.start().await?;

    drone.on_state(|state| println!("STATE {state:#?}"));

    tokio::time::sleep(Duration::from_secs(10)).await;
    println!("latest: {:?}", drone.state());

    drone.close().await;
    Ok(())
}
