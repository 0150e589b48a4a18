use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tracing::{info, warn};

use crate::bot;
use crate::config::Config;
use crate::registry::ChatRegistry;

pub struct BotRuntime {
    config: Config,
    registry: Arc<ChatRegistry>,
}

impl BotRuntime {
    pub async fn new(config: Config) -> Result<Self> {
        let registry = Arc::new(ChatRegistry::open(config.storage.path.clone()).await?);
        Ok(Self { config, registry })
    }

    pub async fn run(self) -> Result<()> {
        if self.config.telegram.owner_id == 0 {
            warn!("telegram.owner_id is not set; nobody can use the wizards");
        }
        info!(
            "starting bot (owner_id={}, registry={} at {}, send_delay_ms={}, page_size={}, scope_by_branch={})",
            self.config.telegram.owner_id,
            self.registry.backend_name(),
            self.config.storage.path.display(),
            self.config.broadcast.send_delay_ms,
            self.config.broadcast.page_size,
            self.config.broadcast.scope_by_branch
        );

        tokio::select! {
            res = bot::run(&self.config, self.registry.clone()) => res,
            _ = signal::ctrl_c() => {
                info!("received ctrl-c, shutting down");
                Ok(())
            }
        }
    }
}
