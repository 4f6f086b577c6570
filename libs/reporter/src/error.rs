#[derive(Debug, thiserror::Error)]
pub enum ReporterError {
    #[error("config ({field}): {detail}")]
    Config { field: &'static str, detail: String },

    #[error("advertise '{topic}': {source}")]
    Advertise { topic: String, source: reporter_api::TransportError },

    #[error("reporting has not started")]
    NotReporting,

    #[error("payload: {0}")]
    Payload(#[from] serde_json::Error),
}
