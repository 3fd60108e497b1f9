use std::sync::Arc;

use tape_api::SystemClock;
use tape_engine::Recorder;
use transport_mqtt::MqttLink;

use crate::config::{EffectiveRecord, RecordArgs};
use crate::error::CliError;

pub async fn run(args: RecordArgs) -> Result<(), CliError> {
    let eff = EffectiveRecord::new(&args)?;
    tracing::info!(config = %args.conn.config, file = %eff.base.file.display(), "loaded config");

    let link = Arc::new(MqttLink::connect(&eff.base.mqtt).await?);
    let recorder = Arc::new(Recorder::new(
        link.clone(),
        Arc::new(SystemClock),
        &eff.base.file,
        eff.base.encoding,
    ));
    link.set_handler(recorder.clone())?;

    if let Err(e) = recorder.start(&eff.topics, eff.qos).await {
        let _ = link.shutdown().await;
        return Err(e.into());
    }
    println!("Recording to {} (Ctrl+C to stop)", eff.base.file.display());

    // --- Wait for Ctrl+C ---
    let signal = tokio::signal::ctrl_c().await;
    tracing::info!("shutting down...");

    let saved = recorder.stop().await;
    if let Err(e) = link.shutdown().await {
        tracing::warn!(error = %e, "disconnect failed");
    }
    signal?;

    let rows = saved?;
    println!("  saved {rows} messages to {}", eff.base.file.display());
    Ok(())
}
