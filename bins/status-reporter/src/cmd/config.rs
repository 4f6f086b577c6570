use clap::{Args, ValueEnum};
use serde::Deserialize;

use status_reporter::ReporterConfig;

use super::error::NodeError;

pub const DEFAULT_ADDR: &str = "127.0.0.1:9300";

// ═══════════════════════════════════════════════════════════════
//  Config file (TOML)
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Построчный JSON по TCP к запущенному агрегатору.
    #[default]
    Tcp,
    /// Шина внутри процесса, полученные апдейты пишутся в лог.
    Memory,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub name: Option<String>,
    pub register_endpoint: Option<String>,
    pub publish_topic: Option<String>,
    pub interval: Option<f64>,
    pub ready_timeout: Option<f64>,
    pub queue_depth: Option<usize>,
    pub transport: Option<TransportKind>,
    pub addr: Option<String>,
}

pub fn load_config(path: &str) -> Result<Config, NodeError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| NodeError::Config { context: "read", detail: format!("'{path}': {e}") })?;
    toml::from_str(&content)
        .map_err(|e| NodeError::Config { context: "parse", detail: format!("'{path}': {e}") })
}

// ═══════════════════════════════════════════════════════════════
//  CLI args
// ═══════════════════════════════════════════════════════════════

#[derive(Args, Clone, Debug, Default)]
pub struct ReporterArgs {
    /// Путь к TOML конфиг файлу
    #[arg(long, default_value = "status-reporter.toml", env = "STATUS_REPORTER_CONFIG")]
    pub config: String,

    /// Имя для регистрации, ставится на каждый апдейт
    #[arg(long, env = "STATUS_REPORTER_NAME")]
    pub name: Option<String>,

    /// Endpoint регистрации
    #[arg(long)]
    pub register_endpoint: Option<String>,

    /// Topic для статус-апдейтов
    #[arg(long)]
    pub publish_topic: Option<String>,

    /// Секунд между апдейтами
    #[arg(long)]
    pub interval: Option<f64>,

    /// Сколько секунд ждать агрегатор при старте (0 = вечно)
    #[arg(long)]
    pub ready_timeout: Option<f64>,

    /// Глубина исходящей очереди
    #[arg(long)]
    pub queue_depth: Option<usize>,

    /// Как достучаться до агрегатора
    #[arg(long, value_enum)]
    pub transport: Option<TransportKind>,

    /// Адрес агрегатора для tcp транспорта
    #[arg(long, env = "STATUS_REPORTER_ADDR")]
    pub addr: Option<String>,
}

// ═══════════════════════════════════════════════════════════════
//  Effective: merged config
// ═══════════════════════════════════════════════════════════════

/// Итоговая конфигурация после мержа: config file < env/CLI, дыры из дефолтов.
#[derive(Debug)]
pub struct Effective {
    pub reporter: ReporterConfig,
    pub transport: TransportKind,
    pub addr: String,
}

impl Effective {
    pub fn new(args: &ReporterArgs) -> Result<Self, NodeError> {
        let cfg = match load_config(&args.config) {
            Ok(c) => c,
            Err(e) => {
                if std::path::Path::new(&args.config).exists() {
                    return Err(e);
                }
                Config::default()
            }
        };

        let defaults = ReporterConfig::default();
        let reporter = ReporterConfig {
            reporter_name: args.name.clone().or(cfg.name).unwrap_or(defaults.reporter_name),
            register_endpoint: args
                .register_endpoint
                .clone()
                .or(cfg.register_endpoint)
                .unwrap_or(defaults.register_endpoint),
            publish_topic: args
                .publish_topic
                .clone()
                .or(cfg.publish_topic)
                .unwrap_or(defaults.publish_topic),
            interval_secs: args.interval.or(cfg.interval).unwrap_or(defaults.interval_secs),
            ready_timeout_secs: args
                .ready_timeout
                .or(cfg.ready_timeout)
                .unwrap_or(defaults.ready_timeout_secs),
            queue_depth: args.queue_depth.or(cfg.queue_depth).unwrap_or(defaults.queue_depth),
        };
        reporter.validate()?;

        Ok(Self {
            reporter,
            transport: args.transport.or(cfg.transport).unwrap_or_default(),
            addr: args.addr.clone().or(cfg.addr).unwrap_or_else(|| DEFAULT_ADDR.to_string()),
        })
    }
}
