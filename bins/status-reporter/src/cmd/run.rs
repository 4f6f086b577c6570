use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use reporter_api::{Registrar, StatusPublisher};
use status_bus::StatusBus;
use status_reporter::{ReporterError, StatusReporter};
use transport_tcp::{TcpPublisher, TcpRegistrar};

use super::config::{Effective, TransportKind};
use super::error::NodeError;

/// Сколько ждать остановки репортера до abort.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn run(eff: &Effective) -> Result<(), NodeError> {
    tracing::info!(
        reporter = %eff.reporter.reporter_name,
        transport = ?eff.transport,
        "status-reporter starting"
    );

    let (registrar, publisher): (Arc<dyn Registrar>, Arc<dyn StatusPublisher>) = match eff.transport {
        TransportKind::Tcp => {
            tracing::info!(addr = %eff.addr, "using tcp aggregator");
            (
                Arc::new(TcpRegistrar::new(eff.addr.clone())),
                Arc::new(TcpPublisher::new(eff.addr.clone())),
            )
        }
        TransportKind::Memory => {
            let bus = StatusBus::new();
            spawn_echo(&bus, &eff.reporter.publish_topic).await?;
            (Arc::new(bus.clone()), Arc::new(bus))
        }
    };

    let mut reporter = StatusReporter::new(eff.reporter.clone(), registrar, publisher)?;

    let token = CancellationToken::new();
    let reporter_token = token.clone();
    let mut handle = tokio::spawn(async move { reporter.run(reporter_token).await });

    tokio::select! {
        // Only a startup error or a panic ends the reporter on its own.
        res = &mut handle => return reporter_exit(res),
        signal = tokio::signal::ctrl_c() => signal?,
    }
    tracing::info!("shutting down...");
    token.cancel();

    match tokio::time::timeout(DRAIN_TIMEOUT, &mut handle).await {
        Ok(res) => reporter_exit(res)?,
        Err(_) => {
            tracing::warn!("reporter did not stop in time, aborting");
            handle.abort();
        }
    }

    tracing::info!("shutdown complete");
    Ok(())
}

/// Итог задачи репортера. Паника задачи тоже ошибка процесса.
fn reporter_exit(res: Result<Result<(), ReporterError>, JoinError>) -> Result<(), NodeError> {
    match res {
        Ok(r) => r.map_err(NodeError::from),
        Err(e) => {
            tracing::error!(error = %e, "reporter task failed");
            Err(NodeError::Task(e))
        }
    }
}

/// Memory транспорт: логировать всё, что приходит в topic.
async fn spawn_echo(bus: &StatusBus, topic: &str) -> Result<(), NodeError> {
    let mut sub = bus.subscribe(topic, 64).await?;
    tokio::spawn(async move {
        while let Some(record) = sub.recv().await {
            tracing::info!(
                topic = %record.topic,
                reporter = %record.update.name,
                ts_ms = record.ts_ms,
                payload = %record.update.payload,
                "status received"
            );
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn panicked_reporter_is_an_error() {
        let handle = tokio::spawn(async {
            let period = Duration::ZERO;
            if period.is_zero() {
                panic!("`period` must be non-zero.");
            }
            Ok::<(), ReporterError>(())
        });
        let err = reporter_exit(handle.await).unwrap_err();
        assert!(matches!(err, NodeError::Task(ref e) if e.is_panic()));
    }

    #[tokio::test]
    async fn clean_stop_is_ok() {
        let handle = tokio::spawn(async { Ok::<(), ReporterError>(()) });
        reporter_exit(handle.await).unwrap();
    }

    #[tokio::test]
    async fn startup_error_is_passed_through() {
        let handle = tokio::spawn(async { Err::<(), _>(ReporterError::NotReporting) });
        let err = reporter_exit(handle.await).unwrap_err();
        assert!(matches!(err, NodeError::Reporter(ReporterError::NotReporting)));
    }
}
