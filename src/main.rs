// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use lidar_bridge::{
    args::Args,
    pipeline::{Bridge, BridgeConfig, ConfigError},
    publisher::MqttPublisher,
    schema::SchemaRegistry,
    source::MulticastSource,
};
use rumqttc::MqttOptions;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(args.rust_log.into())
                .from_env_lossy(),
        )
        .init();

    if let Err(err) = run(args).await {
        error!("{}", err);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), ConfigError> {
    let registry = SchemaRegistry::with_builtin();

    let mut options = MqttOptions::new(
        args.mqtt_client_id.clone(),
        args.mqtt_broker_host.clone(),
        args.mqtt_broker_port,
    );
    options.set_keep_alive(Duration::from_secs(30));
    if let (Some(user), Some(password)) = (&args.mqtt_user, &args.mqtt_password) {
        options.set_credentials(user.clone(), password.clone());
    }
    let publisher = MqttPublisher::connect(options);

    let config = BridgeConfig {
        producer_id: args.producer_id.clone(),
        schema_version: args.schema_version.clone(),
        topic_root: args.mqtt_base_topic.clone(),
        envelopes_per_revolution: args.envelopes_per_revolution,
        retry: args.retry_policy(),
    };
    let bridge = Bridge::new(config, publisher, &registry)?;

    let group = args.group();
    let mut source = MulticastSource::join(group, args.interface).await?;
    info!(
        group = %group,
        broker = %args.mqtt_broker_host,
        "joined sensor bus, bridging to broker"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received, draining");
        let _ = shutdown_tx.send(true);
    });

    bridge
        .run(&mut source, shutdown_rx)
        .await
        .map_err(|err| ConfigError::Broker(err.to_string()))?;

    info!("clean shutdown");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
