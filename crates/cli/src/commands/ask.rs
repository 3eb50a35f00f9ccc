//! `hearthclaw ask` — one synchronous turn from the command line.

use crate::commands::build_runtime;
use anyhow::{Context, bail};
use hearthclaw_config::AppConfig;
use hearthclaw_core::request::InboundRequest;
use hearthclaw_pipeline::InboundJob;
use std::path::Path;

pub async fn run(config_path: &Path, message: String, user: String) -> anyhow::Result<()> {
    let config = AppConfig::load_or_default(config_path).context("loading config")?;
    let runtime = build_runtime(&config)?;

    let request = InboundRequest::synchronous("hearthclaw", user, message);
    let (job, reply_rx) = InboundJob::synchronous(request);
    if runtime.inbound_tx.send(job).await.is_err() {
        bail!("engine is not accepting requests");
    }

    match tokio::time::timeout(runtime.sync_reply_timeout, reply_rx).await {
        Ok(Ok(text)) => {
            println!("{text}");
            Ok(())
        }
        Ok(Err(_)) => bail!("engine dropped the request without a reply"),
        Err(_) => bail!(
            "no reply within {}s",
            runtime.sync_reply_timeout.as_secs()
        ),
    }
}
