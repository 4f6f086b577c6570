#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("{0}")]
    Reporter(#[from] status_reporter::ReporterError),

    #[error("bus: {0}")]
    Bus(#[from] status_bus::BusError),

    #[error("reporter task: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),
}
