pub mod error;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch, RwLock};

use reporter_api::{
    now_ms, RegistrationRequest, RegistrationResponse,
    Registrar, StatusChannel, StatusPublisher, StatusUpdate, TransportError,
};

pub use error::BusError;

// ═══════════════════════════════════════════════════════════════
//  BusRecord
// ═══════════════════════════════════════════════════════════════

/// Статус-апдейт глазами подписчика шины.
#[derive(Debug, Clone)]
pub struct BusRecord {
    /// Время поступления, Unix ms.
    pub ts_ms: i64,
    pub topic: String,
    pub update: StatusUpdate,
}

// ═══════════════════════════════════════════════════════════════
//  Subscription
// ═══════════════════════════════════════════════════════════════

pub struct BusSubscription {
    rx: mpsc::Receiver<BusRecord>,
}

impl BusSubscription {
    /// Следующая запись. None = шина уничтожена.
    pub async fn recv(&mut self) -> Option<BusRecord> {
        self.rx.recv().await
    }

    /// Следующая запись, если она уже в очереди.
    pub fn try_recv(&mut self) -> Option<BusRecord> {
        self.rx.try_recv().ok()
    }
}

// ═══════════════════════════════════════════════════════════════
//  Topic
// ═══════════════════════════════════════════════════════════════

/// Именованный канал: раздаёт каждую запись всем подписчикам.
///
/// Подписчик с полной очередью теряет запись, остальные её получают.
struct Topic {
    name: String,
    subscribers: RwLock<Vec<mpsc::Sender<BusRecord>>>,
}

impl Topic {
    fn new(name: String) -> Self {
        Self {
            name,
            subscribers: RwLock::new(Vec::new()),
        }
    }

    async fn subscribe(&self, buffer: usize) -> Result<BusSubscription, BusError> {
        if buffer == 0 {
            return Err(BusError::ZeroBuffer(self.name.clone()));
        }
        let (tx, rx) = mpsc::channel(buffer);
        self.subscribers.write().await.push(tx);
        Ok(BusSubscription { rx })
    }

    async fn deliver(&self, record: BusRecord) {
        let mut subs = self.subscribers.write().await;
        subs.retain(|tx| match tx.try_send(record.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(topic = %self.name, "subscriber channel full, dropping");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(topic = %self.name, "subscriber gone");
                false
            }
        });
    }
}

// ═══════════════════════════════════════════════════════════════
//  BusChannel: outgoing side handed to the reporter
// ═══════════════════════════════════════════════════════════════

struct BusChannel {
    topic: String,
    tx: mpsc::Sender<StatusUpdate>,
    dropped: Arc<AtomicU64>,
}

impl StatusChannel for BusChannel {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn publish(&self, update: StatusUpdate) {
        match self.tx.try_send(update) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(topic = %self.topic, "outgoing queue full, dropping update");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(topic = %self.topic, "bus gone, dropping update");
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  StatusBus
// ═══════════════════════════════════════════════════════════════

struct Inner {
    ready: watch::Sender<bool>,
    accept: bool,
    attempts: AtomicUsize,
    dropped: Arc<AtomicU64>,
    directory: Mutex<Vec<String>>,
    topics: Mutex<HashMap<String, Arc<Topic>>>,
}

/// Агрегатор внутри процесса: каталог зарегистрированных репортеров
/// и набор topic'ов. Реализует [`Registrar`] и [`StatusPublisher`].
///
/// Клоны дешёвые и разделяют одно состояние.
#[derive(Clone)]
pub struct StatusBus {
    inner: Arc<Inner>,
}

impl Default for StatusBus {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBus {
    /// Готовая шина, принимает любую регистрацию.
    pub fn new() -> Self {
        Self::build(true, true)
    }

    /// Шина, недоступная до вызова [`StatusBus::mark_ready`].
    pub fn pending() -> Self {
        Self::build(false, true)
    }

    /// Готовая шина, отвечает на регистрацию `success = false`.
    pub fn rejecting() -> Self {
        Self::build(true, false)
    }

    fn build(ready: bool, accept: bool) -> Self {
        let (ready, _) = watch::channel(ready);
        Self {
            inner: Arc::new(Inner {
                ready,
                accept,
                attempts: AtomicUsize::new(0),
                dropped: Arc::new(AtomicU64::new(0)),
                directory: Mutex::new(Vec::new()),
                topics: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn mark_ready(&self) {
        self.inner.ready.send_replace(true);
    }

    pub fn is_ready(&self) -> bool {
        *self.inner.ready.borrow()
    }

    /// Имена в каталоге, в порядке регистрации.
    pub fn registered(&self) -> Vec<String> {
        self.inner
            .directory
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    /// Сколько раз вызывали регистрацию, включая отказы.
    pub fn registration_attempts(&self) -> usize {
        self.inner.attempts.load(Ordering::Relaxed)
    }

    /// Апдейты, потерянные исходящими каналами (очередь полна или шины нет).
    pub fn dropped_updates(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    pub fn topics(&self) -> Vec<String> {
        self.inner
            .topics
            .lock()
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Подписаться на topic (создаётся, если его ещё никто не объявил).
    /// `buffer` = сколько записей ждут чтения, дальше новые теряются.
    pub async fn subscribe(&self, topic: &str, buffer: usize) -> Result<BusSubscription, BusError> {
        self.topic(topic)?.subscribe(buffer).await
    }

    fn topic(&self, name: &str) -> Result<Arc<Topic>, BusError> {
        let mut topics = self.inner.topics.lock().map_err(|_| BusError::Poisoned)?;
        let topic = topics
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Topic::new(name.to_string())));
        Ok(topic.clone())
    }

    fn add_to_directory(&self, name: &str) -> Result<(), BusError> {
        let mut dir = self.inner.directory.lock().map_err(|_| BusError::Poisoned)?;
        if dir.iter().any(|n| n == name) {
            tracing::debug!(reporter = %name, "already registered");
        } else {
            dir.push(name.to_string());
        }
        Ok(())
    }
}

impl Registrar for StatusBus {
    fn wait_ready<'a>(
        &'a self,
        _endpoint: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + 'a>> {
        let mut rx = self.inner.ready.subscribe();
        Box::pin(async move {
            loop {
                if *rx.borrow_and_update() {
                    return Ok(());
                }
                rx.changed()
                    .await
                    .map_err(|e| TransportError::io(e.to_string()))?;
            }
        })
    }

    fn register<'a>(
        &'a self,
        endpoint: &'a str,
        request: RegistrationRequest,
    ) -> Pin<Box<dyn Future<Output = Result<RegistrationResponse, TransportError>> + Send + 'a>> {
        Box::pin(async move {
            self.inner.attempts.fetch_add(1, Ordering::Relaxed);
            if !self.is_ready() {
                return Err(BusError::NotReady(endpoint.to_string()).into_transport_error());
            }
            if !self.inner.accept {
                return Ok(RegistrationResponse::rejected("registration refused"));
            }
            self.add_to_directory(&request.name)
                .map_err(BusError::into_transport_error)?;
            tracing::info!(reporter = %request.name, endpoint = %endpoint, "reporter registered");
            Ok(RegistrationResponse::accepted())
        })
    }
}

impl StatusPublisher for StatusBus {
    fn advertise(&self, topic: &str, depth: usize) -> Result<Box<dyn StatusChannel>, TransportError> {
        if depth == 0 {
            return Err(TransportError::config("queue depth must be positive"));
        }
        let target = self.topic(topic).map_err(BusError::into_transport_error)?;
        let (tx, mut rx) = mpsc::channel::<StatusUpdate>(depth);

        tokio::spawn(async move {
            while let Some(update) = rx.recv().await {
                let record = BusRecord {
                    ts_ms: now_ms(),
                    topic: target.name.clone(),
                    update,
                };
                target.deliver(record).await;
            }
        });

        Ok(Box::new(BusChannel {
            topic: topic.to_string(),
            tx,
            dropped: self.inner.dropped.clone(),
        }))
    }
}
