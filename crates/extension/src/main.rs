use std::sync::Arc;

use anyhow::Context;
use jobscout_core::SystemClock;
use jobscout_extension::{Background, ExtensionConfig, SubscriptionClient, host};
use jobscout_observability::LogTarget;
use jobscout_storage::{KvBackend, SqliteKv};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries protocol frames.
    jobscout_observability::init_with(LogTarget::Stderr);

    let config = ExtensionConfig::from_env().context("invalid JOBSCOUT_* configuration")?;

    let kv: Arc<dyn KvBackend> = match std::env::var("JOBSCOUT_DB_URL") {
        Ok(url) => Arc::new(SqliteKv::new(url)),
        Err(_) => Arc::new(SqliteKv::open_default()?),
    };

    let llm = config.llm.build();
    let subscriptions = Arc::new(SubscriptionClient::new(config.backend_url.clone()));

    let (background, commands) = Background::new(config, kv, SystemClock::arc(), llm, subscriptions);
    let background = Arc::new(background);

    let pruner = background.prune_worker().start();

    let served = host::serve(background, tokio::io::stdin(), tokio::io::stdout(), commands).await;

    pruner.shutdown().await;
    served
}
