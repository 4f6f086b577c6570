use serde::{Deserialize, Serialize};

/// Конверт для агрегатора, один на строку.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WireMessage {
    /// Ответ: одна строка `RegistrationResponse`.
    Register { endpoint: String, name: String },
    /// Без ответа.
    Publish { topic: String, name: String, payload: String },
}
