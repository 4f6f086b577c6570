pub mod error;

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

pub use error::{ErrorKind, TransportError};

// ════════════════════════════════════════════════════════════════
//  Messages
// ════════════════════════════════════════════════════════════════

/// Просьба к агрегатору добавить `name` в каталог репортеров.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    /// Уникальный идентификатор репортера.
    pub name: String,
}

/// Ответ агрегатора на [`RegistrationRequest`]. Решение принимается
/// только по `success`, `message` уходит в лог.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RegistrationResponse {
    pub fn accepted() -> Self {
        Self { success: true, message: None }
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        Self { success: false, message: Some(msg.into()) }
    }
}

/// Один статус. `payload` = непрозрачный сериализованный текст,
/// на стороне агрегатора его разбирает тот, кто знает репортер.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub name: String,
    pub payload: String,
}

// ════════════════════════════════════════════════════════════════
//  Collaborator traits
// ════════════════════════════════════════════════════════════════

/// Request/response сторона агрегатора.
pub trait Registrar: Send + Sync {
    /// Завершается, когда `endpoint` доступен. Сам не ограничен по
    /// времени, таймаут ставит вызывающий.
    fn wait_ready<'a>(
        &'a self,
        endpoint: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + 'a>>;

    /// Один синхронный вызов регистрации.
    fn register<'a>(
        &'a self,
        endpoint: &'a str,
        request: RegistrationRequest,
    ) -> Pin<Box<dyn Future<Output = Result<RegistrationResponse, TransportError>> + Send + 'a>>;
}

/// Pub/sub сторона агрегатора.
pub trait StatusPublisher: Send + Sync {
    /// Открыть исходящий канал на `topic`, не больше `depth`
    /// непрочитанных апдейтов.
    fn advertise(&self, topic: &str, depth: usize) -> Result<Box<dyn StatusChannel>, TransportError>;
}

/// Исходящий канал, созданный [`StatusPublisher::advertise`].
///
/// `publish` = fire-and-forget: ошибки доставки и дропы остаются
/// внутри канала и вызывающему не возвращаются.
pub trait StatusChannel: Send {
    fn topic(&self) -> &str;

    fn publish(&self, update: StatusUpdate);
}

/// Текущее Unix-время в миллисекундах.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
