pub mod framing;
pub mod wire;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use reporter_api::{
    RegistrationRequest, RegistrationResponse, Registrar, StatusChannel,
    StatusPublisher, StatusUpdate, TransportError,
};

pub use framing::LinesFraming;
pub use wire::WireMessage;

/// Пауза между попытками подключения, пока ждём агрегатор.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_millis(250);

fn encode_line(msg: &WireMessage) -> Result<Vec<u8>, TransportError> {
    let json = serde_json::to_vec(msg)?;
    let mut buf = Vec::with_capacity(json.len() + 1);
    LinesFraming::default().encode(&json, &mut buf);
    Ok(buf)
}

async fn connect(addr: &str) -> Result<TcpStream, TransportError> {
    TcpStream::connect(addr)
        .await
        .map_err(|e| TransportError::io(format!("TCP connect to {addr}: {e}")))
}

async fn read_line(stream: &mut TcpStream, framing: &LinesFraming) -> Result<Vec<u8>, TransportError> {
    let mut buf = Vec::with_capacity(256);
    let mut chunk = [0u8; 1024];
    loop {
        if let Some((line, _)) = framing.decode(&buf)? {
            return Ok(line);
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(TransportError::io("connection closed before reply"));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

// ═══════════════════════════════════════════════════════════════
//  TcpRegistrar
// ═══════════════════════════════════════════════════════════════

/// Регистрация через короткое TCP соединение: строка запроса,
/// строка ответа.
pub struct TcpRegistrar {
    addr: String,
    probe_interval: Duration,
}

impl TcpRegistrar {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            probe_interval: DEFAULT_PROBE_INTERVAL,
        }
    }

    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }
}

impl Registrar for TcpRegistrar {
    fn wait_ready<'a>(
        &'a self,
        endpoint: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + 'a>> {
        Box::pin(async move {
            let mut attempts = 0u64;
            loop {
                match TcpStream::connect(&self.addr).await {
                    Ok(mut stream) => {
                        // probe session carries no bytes; close it with FIN, not RST
                        if let Err(e) = stream.shutdown().await {
                            tracing::trace!(addr = %self.addr, error = %e, "probe shutdown failed");
                        }
                        tracing::debug!(addr = %self.addr, endpoint = %endpoint, attempts, "aggregator reachable");
                        return Ok(());
                    }
                    Err(e) => {
                        attempts += 1;
                        tracing::trace!(addr = %self.addr, error = %e, "aggregator not reachable yet");
                        tokio::time::sleep(self.probe_interval).await;
                    }
                }
            }
        })
    }

    fn register<'a>(
        &'a self,
        endpoint: &'a str,
        request: RegistrationRequest,
    ) -> Pin<Box<dyn Future<Output = Result<RegistrationResponse, TransportError>> + Send + 'a>> {
        Box::pin(async move {
            let line = encode_line(&WireMessage::Register {
                endpoint: endpoint.to_string(),
                name: request.name,
            })?;

            let mut stream = connect(&self.addr).await?;
            stream.write_all(&line).await?;
            stream.flush().await?;

            let reply = read_line(&mut stream, &LinesFraming::default()).await?;
            let resp: RegistrationResponse = serde_json::from_slice(&reply)?;
            Ok(resp)
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  TcpPublisher
// ═══════════════════════════════════════════════════════════════

/// Публикация через одно долгоживущее TCP соединение на канал.
pub struct TcpPublisher {
    addr: String,
}

impl TcpPublisher {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

impl StatusPublisher for TcpPublisher {
    fn advertise(&self, topic: &str, depth: usize) -> Result<Box<dyn StatusChannel>, TransportError> {
        if depth == 0 {
            return Err(TransportError::config("queue depth must be positive"));
        }
        let (tx, rx) = mpsc::channel(depth);
        let writer = ChannelWriter {
            addr: self.addr.clone(),
            topic: topic.to_string(),
            stream: None,
        };
        tokio::spawn(writer.run(rx));

        Ok(Box::new(TcpChannel {
            topic: topic.to_string(),
            tx,
        }))
    }
}

struct TcpChannel {
    topic: String,
    tx: mpsc::Sender<StatusUpdate>,
}

impl StatusChannel for TcpChannel {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn publish(&self, update: StatusUpdate) {
        match self.tx.try_send(update) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(topic = %self.topic, "outgoing queue full, dropping update");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(topic = %self.topic, "writer gone, dropping update");
            }
        }
    }
}

/// Перекладывает очередь канала в сокет. Подключается лениво,
/// на каждую неудачную запись один reconnect.
struct ChannelWriter {
    addr: String,
    topic: String,
    stream: Option<TcpStream>,
}

impl ChannelWriter {
    async fn run(mut self, mut rx: mpsc::Receiver<StatusUpdate>) {
        while let Some(update) = rx.recv().await {
            let line = match encode_line(&WireMessage::Publish {
                topic: self.topic.clone(),
                name: update.name,
                payload: update.payload,
            }) {
                Ok(l) => l,
                Err(e) => {
                    tracing::warn!(topic = %self.topic, error = ?e, "encode error, dropping update");
                    continue;
                }
            };
            self.send_reconnect(&line).await;
        }
        tracing::debug!(topic = %self.topic, "channel closed");
    }

    async fn send(&mut self, line: &[u8]) -> Result<(), TransportError> {
        if self.stream.is_none() {
            self.stream = Some(connect(&self.addr).await?);
            tracing::info!(addr = %self.addr, topic = %self.topic, "publish connection open");
        }
        if let Some(stream) = self.stream.as_mut() {
            stream.write_all(line).await?;
        }
        Ok(())
    }

    async fn send_reconnect(&mut self, line: &[u8]) {
        if let Err(e) = self.send(line).await {
            tracing::warn!(topic = %self.topic, error = ?e, "send error, reconnecting");
            self.stream = None;
            if let Err(e) = self.send(line).await {
                tracing::warn!(topic = %self.topic, error = ?e, "send failed, dropping update");
                self.stream = None;
            }
        }
    }
}
