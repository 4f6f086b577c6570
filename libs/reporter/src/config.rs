use std::time::Duration;

use crate::error::ReporterError;

pub const DEFAULT_REPORTER_NAME: &str = "example_mrccc_custom_status_data_node";
pub const DEFAULT_REGISTER_ENDPOINT: &str = "mrccc_custom_status_data_server/register_data";
pub const DEFAULT_PUBLISH_TOPIC: &str = "mrccc_custom_status_data_server/update_data";
pub const DEFAULT_INTERVAL_SECS: f64 = 1.0;
pub const DEFAULT_READY_TIMEOUT_SECS: f64 = 30.0;
pub const DEFAULT_QUEUE_DEPTH: usize = 10;
/// Верхняя граница периода: сутки.
pub const MAX_INTERVAL_SECS: f64 = 86_400.0;

/// Всё, что репортеру нужно знать о себе и об агрегаторе.
#[derive(Debug, Clone, PartialEq)]
pub struct ReporterConfig {
    /// Идентификатор для регистрации и каждого апдейта.
    pub reporter_name: String,
    pub register_endpoint: String,
    pub publish_topic: String,
    /// Период тика, секунды.
    pub interval_secs: f64,
    /// Предел ожидания агрегатора при старте. 0 = ждать вечно.
    pub ready_timeout_secs: f64,
    /// Сколько непрочитанных апдейтов держит исходящий канал.
    pub queue_depth: usize,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            reporter_name: DEFAULT_REPORTER_NAME.to_string(),
            register_endpoint: DEFAULT_REGISTER_ENDPOINT.to_string(),
            publish_topic: DEFAULT_PUBLISH_TOPIC.to_string(),
            interval_secs: DEFAULT_INTERVAL_SECS,
            ready_timeout_secs: DEFAULT_READY_TIMEOUT_SECS,
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

impl ReporterConfig {
    pub fn validate(&self) -> Result<(), ReporterError> {
        non_empty("reporter_name", &self.reporter_name)?;
        non_empty("register_endpoint", &self.register_endpoint)?;
        non_empty("publish_topic", &self.publish_topic)?;

        let interval = Duration::try_from_secs_f64(self.interval_secs).unwrap_or_default();
        if interval.is_zero() || self.interval_secs > MAX_INTERVAL_SECS {
            return Err(ReporterError::Config {
                field: "interval_secs",
                detail: format!(
                    "must be between 1ns and {MAX_INTERVAL_SECS}s, got {}",
                    self.interval_secs
                ),
            });
        }
        if Duration::try_from_secs_f64(self.ready_timeout_secs).is_err() {
            return Err(ReporterError::Config {
                field: "ready_timeout_secs",
                detail: format!("must be zero or positive, got {}", self.ready_timeout_secs),
            });
        }
        if self.queue_depth == 0 {
            return Err(ReporterError::Config {
                field: "queue_depth",
                detail: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_secs)
    }

    /// None = без ограничения.
    pub fn ready_timeout(&self) -> Option<Duration> {
        if self.ready_timeout_secs == 0.0 {
            None
        } else {
            Some(Duration::from_secs_f64(self.ready_timeout_secs))
        }
    }
}

fn non_empty(field: &'static str, value: &str) -> Result<(), ReporterError> {
    if value.trim().is_empty() {
        return Err(ReporterError::Config {
            field,
            detail: "must not be empty".into(),
        });
    }
    Ok(())
}
