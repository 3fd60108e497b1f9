use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use tape_engine::Replayer;
use transport_mqtt::MqttLink;

use crate::config::{EffectiveReplay, ReplayArgs};
use crate::error::CliError;

pub async fn run(args: ReplayArgs) -> Result<(), CliError> {
    let eff = EffectiveReplay::new(&args)?;
    tracing::info!(config = %args.conn.config, file = %eff.base.file.display(), "loaded config");

    let link = Arc::new(MqttLink::connect(&eff.base.mqtt).await?);
    let replayer = Replayer::new(link.clone(), &eff.base.file, eff.base.encoding).with_progress(true);

    // Ctrl+C ends the replay cooperatively.
    let token = CancellationToken::new();
    let watcher = {
        let token = token.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("interrupted");
                    token.cancel();
                }
                Err(e) => tracing::error!(error = %e, "cannot listen for Ctrl+C"),
            }
        })
    };

    let outcome = replayer.replay_until(eff.looping, &token).await;
    watcher.abort();
    if let Err(e) = link.shutdown().await {
        tracing::warn!(error = %e, "disconnect failed");
    }

    let stats = outcome?;
    println!("  replayed {} messages in {} pass(es)", stats.published, stats.passes);
    Ok(())
}
