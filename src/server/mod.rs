pub mod api;

use crate::agent::ChatAgent;
use crate::cli::Args;
use crate::limiter::spawn_pruner;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

const LIMITER_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

pub struct Server {
    addr: String,
    agent: Arc<ChatAgent>,
    args: Args,
}

impl Server {
    pub fn new(addr: String, agent: Arc<ChatAgent>, args: Args) -> Self {
        Self { addr, agent, args }
    }

    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let pruner = spawn_pruner(self.agent.limiter(), LIMITER_PRUNE_INTERVAL);
        let result = api::start_http_server(&self.addr, self.agent.clone(), &self.args).await;
        pruner.abort();
        result
    }
}
