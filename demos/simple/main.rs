use std::time::Duration;

use minixperiment::{
    ClientConfig, ExperimentConfig, ExperimentType, ExperimentsConfig, GetOptions, StaticProvider,
};

#[tokio::main]
pub async fn main() {
    env_logger::init();

    let experiments = ExperimentsConfig::from([
        (
            "player-mode".to_owned(),
            ExperimentConfig::new(ExperimentType::Device)
                .with_name("Player mode")
                .with_version(3)
                .with_group("html5", 90)
                .with_group("flash", 10),
        ),
        (
            "chat-layout".to_owned(),
            ExperimentConfig::new(ExperimentType::Channel)
                .with_group("classic", 1)
                .with_group("compact", 1),
        ),
    ]);

    // Configuration is fetched once, when the client is created. Use
    // `ServiceProvider::new(ServiceProvider::SERVICE_URL)` to fetch it from the experiments service.
    let client = ClientConfig::new("demo-device", "demo")
        .default_value("player-mode", "html5")
        .default_value("chat-layout", "classic")
        .provider(StaticProvider::new(experiments))
        .batch_timeout(Duration::from_millis(500))
        .to_client()
        .unwrap();

    if let Err(err) = client.wait_for_configuration().await {
        println!("Configuration failed to load, using defaults: {err}");
    }

    let player_mode = client.get("player-mode", GetOptions::default()).await;
    println!("player-mode: {:?}", player_mode);

    for channel in ["channel_0", "channel_1", "channel_2"] {
        let layout = client
            .get("chat-layout", GetOptions::default().channel(channel))
            .await;
        println!("chat-layout on {channel}: {:?}", layout);
    }

    // Deliver the queued tracking events before exiting.
    client.flush().await;
}
