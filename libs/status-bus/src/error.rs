use reporter_api::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("endpoint '{0}' is not available")]
    NotReady(String),

    #[error("topic '{0}': subscription buffer must be positive")]
    ZeroBuffer(String),

    #[error("bus state poisoned")]
    Poisoned,
}

impl BusError {
    /// Перевести в ошибку для вызывающей стороны.
    ///
    /// `NotReady` → Io (можно повторить позже).
    /// `ZeroBuffer`, `Poisoned` → Config (повтор не поможет).
    pub fn into_transport_error(self) -> TransportError {
        match self {
            BusError::NotReady(_) => TransportError::io(self.to_string()),
            BusError::ZeroBuffer(_) | BusError::Poisoned => TransportError::config(self.to_string()),
        }
    }
}
