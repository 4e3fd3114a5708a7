use buxtehude_transport::TransportError;

/// Errors that can occur while connecting a client endpoint.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// The client already has a live connection.
    #[error("client is already connected")]
    AlreadyConnected,

    /// Hostname resolution failed.
    #[error("failed to resolve {host}: {source}")]
    Resolve {
        host: String,
        source: std::io::Error,
    },

    /// The transport could not be connected.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        source: std::io::Error,
    },

    /// The per-endpoint reactor could not be set up.
    #[error("failed to initialise reactor: {0}")]
    ReactorInit(std::io::Error),

    /// The connection opened but the handshake could not be sent.
    #[error("failed to send handshake")]
    HandshakeWrite,
}

impl ConnectError {
    pub(crate) fn from_transport(err: TransportError) -> Self {
        match err {
            TransportError::Resolve { host, source } => ConnectError::Resolve { host, source },
            TransportError::Connect { endpoint, source } => {
                ConnectError::Connect { endpoint, source }
            }
            other => ConnectError::Connect {
                endpoint: String::new(),
                source: other.into_io(),
            },
        }
    }
}

/// Errors that can occur while enabling a broker transport.
#[derive(Debug, thiserror::Error)]
pub enum ListenError {
    /// The broker's reactor could not be set up.
    #[error("failed to initialise reactor: {0}")]
    ReactorInit(std::io::Error),

    /// The listening socket could not be bound.
    #[error("failed to bind {endpoint}: {source}")]
    Bind {
        endpoint: String,
        source: std::io::Error,
    },
}

impl ListenError {
    pub(crate) fn from_transport(err: TransportError) -> Self {
        match err {
            TransportError::Bind { endpoint, source } => ListenError::Bind { endpoint, source },
            other => ListenError::Bind {
                endpoint: String::new(),
                source: other.into_io(),
            },
        }
    }
}
