use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use reporter_api::{
    RegistrationRequest, Registrar, StatusChannel, StatusPublisher, StatusUpdate,
    TransportError,
};

use crate::config::ReporterConfig;
use crate::error::ReporterError;
use crate::payload::SampleStatus;

// ═══════════════════════════════════════════════════════════════
//  Lifecycle
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReporterState {
    Constructed,
    /// Ждём endpoint регистрации, затем вызываем его.
    Registering,
    Registered,
    /// Регистрация не удалась, отчёты всё равно идут.
    Unregistered,
    Reporting,
    Terminated,
}

/// Итог ограниченного ожидания при старте.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    TimedOut { waited: Duration },
    Unavailable(TransportError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    Registered,
    Rejected(Option<String>),
    Failed(TransportError),
}

impl RegistrationOutcome {
    pub fn is_registered(&self) -> bool {
        matches!(self, RegistrationOutcome::Registered)
    }
}

// ═══════════════════════════════════════════════════════════════
//  StatusReporter
// ═══════════════════════════════════════════════════════════════

/// Один раз регистрирует имя в агрегаторе, затем на каждом тике
/// публикует под этим именем статус.
///
/// После конструирования ничего не фатально: ошибки регистрации и
/// доставки логируются, репортер продолжает работу.
pub struct StatusReporter {
    config: ReporterConfig,
    registrar: Arc<dyn Registrar>,
    publisher: Arc<dyn StatusPublisher>,
    state: ReporterState,
    readiness: Option<Readiness>,
    registration: Option<RegistrationOutcome>,
    channel: Option<Box<dyn StatusChannel>>,
    sample_counter: i64,
}

impl StatusReporter {
    pub fn new(
        config: ReporterConfig,
        registrar: Arc<dyn Registrar>,
        publisher: Arc<dyn StatusPublisher>,
    ) -> Result<Self, ReporterError> {
        config.validate()?;
        Ok(Self {
            config,
            registrar,
            publisher,
            state: ReporterState::Constructed,
            readiness: None,
            registration: None,
            channel: None,
            sample_counter: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.reporter_name
    }

    pub fn config(&self) -> &ReporterConfig {
        &self.config
    }

    pub fn state(&self) -> ReporterState {
        self.state
    }

    pub fn sample_counter(&self) -> i64 {
        self.sample_counter
    }

    pub fn readiness(&self) -> Option<&Readiness> {
        self.readiness.as_ref()
    }

    pub fn registration(&self) -> Option<&RegistrationOutcome> {
        self.registration.as_ref()
    }

    /// Дождаться доступности endpoint'а регистрации, не дольше
    /// `ready_timeout`.
    pub async fn wait_for_registrar(&mut self) -> Readiness {
        self.state = ReporterState::Registering;
        let endpoint = self.config.register_endpoint.as_str();
        tracing::info!(reporter = %self.config.reporter_name, endpoint = %endpoint, "waiting for service");

        let wait = self.registrar.wait_ready(endpoint);
        let result = match self.config.ready_timeout() {
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(r) => r.map_err(Some),
                Err(_) => Err(None),
            },
            None => wait.await.map_err(Some),
        };

        let readiness = match result {
            Ok(()) => Readiness::Ready,
            Err(Some(e)) => {
                tracing::error!(endpoint = %endpoint, error = %e, "service unavailable");
                Readiness::Unavailable(e)
            }
            Err(None) => {
                let waited = self.config.ready_timeout().unwrap_or_default();
                tracing::error!(endpoint = %endpoint, waited_s = waited.as_secs_f64(), "gave up waiting for service");
                Readiness::TimedOut { waited }
            }
        };
        self.readiness = Some(readiness.clone());
        readiness
    }

    /// Зарегистрировать имя. До агрегатора доходит только первый вызов,
    /// следующие возвращают сохранённый результат.
    pub async fn register(&mut self) -> RegistrationOutcome {
        if let Some(outcome) = &self.registration {
            tracing::debug!(reporter = %self.config.reporter_name, "registration already attempted");
            return outcome.clone();
        }

        if !matches!(self.readiness, Some(Readiness::Ready)) {
            tracing::warn!(
                endpoint = %self.config.register_endpoint,
                "registering without a confirmed endpoint"
            );
        }

        self.state = ReporterState::Registering;
        let endpoint = self.config.register_endpoint.as_str();
        let request = RegistrationRequest {
            name: self.config.reporter_name.clone(),
        };
        let call = self.registrar.register(endpoint, request);
        let result = match self.config.ready_timeout() {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or_else(|_| Err(TransportError::timeout(format!("no answer from {endpoint}")))),
            None => call.await,
        };

        let outcome = match result {
            Ok(resp) if resp.success => {
                tracing::info!(reporter = %self.config.reporter_name, "successfully registered to service");
                RegistrationOutcome::Registered
            }
            Ok(resp) => {
                tracing::error!(
                    reporter = %self.config.reporter_name,
                    endpoint = %endpoint,
                    reason = resp.message.as_deref().unwrap_or("none given"),
                    "service refused registration"
                );
                RegistrationOutcome::Rejected(resp.message)
            }
            Err(e) => {
                tracing::error!(
                    reporter = %self.config.reporter_name,
                    endpoint = %endpoint,
                    error = ?e,
                    "failed to register to the service"
                );
                RegistrationOutcome::Failed(e)
            }
        };

        self.state = if outcome.is_registered() {
            ReporterState::Registered
        } else {
            ReporterState::Unregistered
        };
        self.registration = Some(outcome.clone());
        outcome
    }

    /// Открыть исходящий канал. Тики крутит [`Self::report_until`].
    pub fn start_reporting(&mut self) -> Result<(), ReporterError> {
        if self.channel.is_some() {
            return Ok(());
        }
        let topic = &self.config.publish_topic;
        let channel = self
            .publisher
            .advertise(topic, self.config.queue_depth)
            .map_err(|source| ReporterError::Advertise { topic: topic.clone(), source })?;
        tracing::info!(
            topic = %topic,
            depth = self.config.queue_depth,
            interval_s = self.config.interval_secs,
            "reporting started"
        );
        self.channel = Some(channel);
        self.state = ReporterState::Reporting;
        Ok(())
    }

    /// Один тик: счётчик +1, собрать sample, опубликовать.
    pub fn on_tick(&mut self) -> Result<StatusUpdate, ReporterError> {
        let channel = self.channel.as_ref().ok_or(ReporterError::NotReporting)?;

        self.sample_counter += 1;
        let payload = SampleStatus::new(self.sample_counter).to_payload()?;
        let update = StatusUpdate {
            name: self.config.reporter_name.clone(),
            payload,
        };
        channel.publish(update.clone());
        tracing::debug!(topic = %channel.topic(), sample = self.sample_counter, "status published");
        Ok(update)
    }

    /// Тикать каждые `interval` до срабатывания `shutdown`, затем закрыть канал.
    ///
    /// Первый тик через полный период после вызова. Затянувшийся тик
    /// сдвигает расписание, пачки догоняющих тиков не будет.
    pub async fn report_until(&mut self, shutdown: &CancellationToken) -> Result<(), ReporterError> {
        self.start_reporting()?;

        let period = self.config.interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.on_tick() {
                        tracing::error!(error = %e, "tick failed");
                    }
                }
            }
        }

        self.channel = None;
        self.state = ReporterState::Terminated;
        tracing::info!(reporter = %self.config.reporter_name, sent = self.sample_counter, "reporting stopped");
        Ok(())
    }

    /// Полный цикл: ждать агрегатор, зарегистрироваться, слать отчёты
    /// до `shutdown`.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<(), ReporterError> {
        let readiness = tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            r = self.wait_for_registrar() => Some(r),
        };
        if readiness.is_none() {
            self.state = ReporterState::Terminated;
            return Ok(());
        }

        let registered = tokio::select! {
            biased;
            _ = shutdown.cancelled() => false,
            _ = self.register() => true,
        };
        if !registered {
            self.state = ReporterState::Terminated;
            return Ok(());
        }

        self.report_until(&shutdown).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reporter_api::ErrorKind;
    use status_bus::{BusSubscription, StatusBus};

    use crate::config::{DEFAULT_PUBLISH_TOPIC, DEFAULT_REPORTER_NAME};

    fn reporter(bus: &StatusBus, config: ReporterConfig) -> StatusReporter {
        let bus = Arc::new(bus.clone());
        StatusReporter::new(config, bus.clone(), bus).unwrap()
    }

    async fn subscribe(bus: &StatusBus) -> BusSubscription {
        bus.subscribe(DEFAULT_PUBLISH_TOPIC, 64)
            .await
            .unwrap()
    }

    fn sample_of(update: &StatusUpdate) -> SampleStatus {
        serde_json::from_str(&update.payload).unwrap()
    }

    fn drain(sub: &mut BusSubscription) -> Vec<StatusUpdate> {
        let mut out = Vec::new();
        while let Some(rec) = sub.try_recv() {
            out.push(rec.update);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn three_ticks_publish_counters_in_order() {
        let bus = StatusBus::new();
        let mut sub = subscribe(&bus).await;
        let token = CancellationToken::new();

        let mut r = reporter(&bus, ReporterConfig::default());
        let task = {
            let token = token.clone();
            tokio::spawn(async move {
                r.run(token).await.unwrap();
                r
            })
        };

        tokio::time::sleep(Duration::from_millis(3500)).await;
        token.cancel();
        let r = task.await.unwrap();
        tokio::task::yield_now().await;

        assert_eq!(r.sample_counter(), 3);
        assert_eq!(r.state(), ReporterState::Terminated);

        let updates = drain(&mut sub);
        assert_eq!(updates.len(), 3);
        for (i, update) in updates.iter().enumerate() {
            assert_eq!(update.name, DEFAULT_REPORTER_NAME);
            let sample = sample_of(update);
            assert_eq!(sample.sample_field_str, "teststr");
            assert_eq!(sample.sample_field_int, i as i64 + 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_waits_one_period() {
        let bus = StatusBus::new();
        let mut sub = subscribe(&bus).await;
        let token = CancellationToken::new();

        let mut r = reporter(&bus, ReporterConfig::default());
        let task = {
            let token = token.clone();
            tokio::spawn(async move { r.run(token).await })
        };

        tokio::time::sleep(Duration::from_millis(900)).await;
        assert!(sub.try_recv().is_none());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(drain(&mut sub).len(), 1);

        token.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn registers_once_before_first_tick() {
        let bus = StatusBus::new();
        let mut sub = subscribe(&bus).await;
        let token = CancellationToken::new();

        let mut r = reporter(&bus, ReporterConfig::default());
        let task = {
            let token = token.clone();
            tokio::spawn(async move {
                r.run(token).await.unwrap();
                r
            })
        };

        let first = sub.recv().await.unwrap();
        assert_eq!(sample_of(&first.update).sample_field_int, 1);
        assert_eq!(bus.registered(), vec![DEFAULT_REPORTER_NAME.to_string()]);
        assert_eq!(bus.registration_attempts(), 1);

        token.cancel();
        let mut r = task.await.unwrap();
        assert_eq!(r.register().await, RegistrationOutcome::Registered);
        assert_eq!(bus.registration_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_registration_still_reports() {
        let bus = StatusBus::rejecting();
        let mut sub = subscribe(&bus).await;
        let token = CancellationToken::new();

        let mut r = reporter(&bus, ReporterConfig::default());
        let task = {
            let token = token.clone();
            tokio::spawn(async move {
                r.run(token).await.unwrap();
                r
            })
        };

        tokio::time::sleep(Duration::from_millis(2500)).await;
        token.cancel();
        let r = task.await.unwrap();
        tokio::task::yield_now().await;

        assert!(matches!(r.registration(), Some(RegistrationOutcome::Rejected(_))));
        assert_eq!(bus.registration_attempts(), 1);
        assert_eq!(drain(&mut sub).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn readiness_timeout_is_observable_and_not_fatal() {
        let bus = StatusBus::pending();
        let mut sub = subscribe(&bus).await;
        let token = CancellationToken::new();

        let config = ReporterConfig {
            ready_timeout_secs: 5.0,
            ..ReporterConfig::default()
        };
        let mut r = reporter(&bus, config);
        let task = {
            let token = token.clone();
            tokio::spawn(async move {
                r.run(token).await.unwrap();
                r
            })
        };

        tokio::time::sleep(Duration::from_millis(6500)).await;
        token.cancel();
        let r = task.await.unwrap();
        tokio::task::yield_now().await;

        assert_eq!(
            r.readiness(),
            Some(&Readiness::TimedOut { waited: Duration::from_secs(5) })
        );
        match r.registration() {
            Some(RegistrationOutcome::Failed(e)) => assert_eq!(e.kind(), ErrorKind::Io),
            other => panic!("unexpected registration outcome: {other:?}"),
        }
        assert_eq!(bus.registration_attempts(), 1);
        assert_eq!(drain(&mut sub).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_wait_proceeds_once_ready() {
        let bus = StatusBus::pending();
        let config = ReporterConfig {
            ready_timeout_secs: 0.0,
            ..ReporterConfig::default()
        };
        let mut r = reporter(&bus, config);
        let task = tokio::spawn(async move {
            let readiness = r.wait_for_registrar().await;
            (r, readiness)
        });

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(!task.is_finished());

        bus.mark_ready();
        let (mut r, readiness) = task.await.unwrap();
        assert_eq!(readiness, Readiness::Ready);
        assert!(r.register().await.is_registered());
        assert_eq!(r.state(), ReporterState::Registered);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_while_waiting_skips_registration() {
        let bus = StatusBus::pending();
        let token = CancellationToken::new();
        let mut r = reporter(&bus, ReporterConfig::default());
        let task = {
            let token = token.clone();
            tokio::spawn(async move {
                r.run(token).await.unwrap();
                r
            })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();
        let r = task.await.unwrap();

        assert_eq!(r.state(), ReporterState::Terminated);
        assert_eq!(bus.registration_attempts(), 0);
        assert_eq!(r.sample_counter(), 0);
    }

    #[tokio::test]
    async fn tick_before_start_is_an_error() {
        let bus = StatusBus::new();
        let mut r = reporter(&bus, ReporterConfig::default());
        assert!(matches!(r.on_tick(), Err(ReporterError::NotReporting)));
        assert_eq!(r.sample_counter(), 0);
    }

    #[tokio::test]
    async fn manual_ticks_count_without_gaps() {
        let bus = StatusBus::new();
        let mut r = reporter(&bus, ReporterConfig::default());
        r.start_reporting().unwrap();
        assert_eq!(r.state(), ReporterState::Reporting);

        for n in 1..=5 {
            let update = r.on_tick().unwrap();
            assert_eq!(update.name, DEFAULT_REPORTER_NAME);
            assert_eq!(sample_of(&update).sample_field_int, n);
            assert_eq!(r.sample_counter(), n);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn custom_interval_and_topic() {
        let bus = StatusBus::new();
        let mut sub = bus.subscribe("fleet/status", 64).await.unwrap();
        let token = CancellationToken::new();

        let config = ReporterConfig {
            reporter_name: "rover-1".into(),
            publish_topic: "fleet/status".into(),
            interval_secs: 0.5,
            ..ReporterConfig::default()
        };
        let mut r = reporter(&bus, config);
        let task = {
            let token = token.clone();
            tokio::spawn(async move { r.run(token).await })
        };

        tokio::time::sleep(Duration::from_millis(2200)).await;
        token.cancel();
        task.await.unwrap().unwrap();
        tokio::task::yield_now().await;

        let updates = drain(&mut sub);
        assert_eq!(updates.len(), 4);
        assert!(updates.iter().all(|u| u.name == "rover-1"));
        assert_eq!(bus.registered(), vec!["rover-1".to_string()]);
    }

    #[test]
    fn invalid_config_fails_construction() {
        let bus = Arc::new(StatusBus::new());
        let cases = [
            ReporterConfig { queue_depth: 0, ..ReporterConfig::default() },
            // would be Duration::ZERO for the ticker
            ReporterConfig { interval_secs: 1e-10, ..ReporterConfig::default() },
            // would overflow Instant::now() + period
            ReporterConfig { interval_secs: 1e19, ..ReporterConfig::default() },
        ];
        for config in cases {
            let res = StatusReporter::new(config, bus.clone(), bus.clone());
            assert!(matches!(res, Err(ReporterError::Config { .. })));
        }
    }
}
