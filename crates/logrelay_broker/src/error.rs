use logrelay_protocol::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    /// Broker unreachable at startup. Fatal for the calling process.
    #[error("Failed to connect to broker at {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: zeromq::ZmqError,
    },

    #[error("Timed out after {timeout:?} connecting to broker at {endpoint}")]
    ConnectTimeout {
        endpoint: String,
        timeout: std::time::Duration,
    },

    #[error("Failed to bind broker endpoint {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: zeromq::ZmqError,
    },

    /// Steady-state transport failure. Logged by callers; loops continue.
    #[error("Broker transport error: {0}")]
    Transport(#[from] zeromq::ZmqError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Broker closed")]
    Closed,
}

impl BrokerError {
    pub fn is_connect(&self) -> bool {
        matches!(
            self,
            BrokerError::Connect { .. } | BrokerError::ConnectTimeout { .. } | BrokerError::Bind { .. }
        )
    }
}
