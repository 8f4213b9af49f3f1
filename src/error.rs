use std::path::PathBuf;

/// Failure of the channel to the sandboxed page. Always fatal to the run.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("failed to launch browser '{command}': {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("browser did not report a DevTools endpoint: {0}")]
    NoEndpoint(String),
    #[error("failed to connect to {endpoint}: {message}")]
    Connect { endpoint: String, message: String },
    #[error("{method} failed: {message}")]
    Protocol { method: String, message: String },
    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },
    #[error("failed to read script {}: {source}", path.display())]
    ReadScript {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("script {name} threw while loading: {message}")]
    Inject { name: String, message: String },
    #[error("connection to the page was closed")]
    Disconnected,
}
