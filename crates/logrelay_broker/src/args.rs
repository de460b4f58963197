//! CLI/environment surface for broker endpoints and topic names.

use logrelay_protocol::defaults::*;
use logrelay_protocol::{BrokerConfig, TopicConfig};

#[derive(clap::Args, Debug, Clone)]
pub struct BrokerArgs {
    /// Endpoint publishers connect to (forwarder frontend)
    #[arg(long, env = "LOGRELAY_BROKER_FRONTEND", default_value = DEFAULT_BROKER_FRONTEND)]
    pub broker_frontend: String,

    /// Endpoint subscribers connect to (forwarder backend)
    #[arg(long, env = "LOGRELAY_BROKER_BACKEND", default_value = DEFAULT_BROKER_BACKEND)]
    pub broker_backend: String,
}

impl From<BrokerArgs> for BrokerConfig {
    fn from(args: BrokerArgs) -> Self {
        BrokerConfig {
            frontend: args.broker_frontend,
            backend: args.broker_backend,
        }
    }
}

#[derive(clap::Args, Debug, Clone)]
pub struct TopicArgs {
    #[arg(long, env = "LOGRELAY_PROCESSING_TOPIC", default_value = DEFAULT_PROCESSING_TOPIC)]
    pub processing_topic: String,

    #[arg(long, env = "LOGRELAY_PROGRESS_TOPIC", default_value = DEFAULT_PROGRESS_TOPIC)]
    pub progress_topic: String,

    #[arg(long, env = "LOGRELAY_RESULT_TOPIC", default_value = DEFAULT_RESULT_TOPIC)]
    pub result_topic: String,
}

impl From<TopicArgs> for TopicConfig {
    fn from(args: TopicArgs) -> Self {
        TopicConfig {
            processing: args.processing_topic,
            progress: args.progress_topic,
            result: args.result_topic,
        }
    }
}
