//! Shared utilities for pool integration tests.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio_util::sync::CancellationToken;

use peer_balancer::config::BalancerConfig;
use peer_balancer::load_balancer::{PoolHandle, PoolStatus};
use peer_balancer::net::MemoryNetwork;
use peer_balancer::protocol::{
    ConfigAck, HealthReport, HelloAck, Message, MessageType, Pdu, PduReader,
    TerminateAck,
};

/// How a programmable backend answers HEALTH_REQUEST.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Healthy,
    /// ERROR(500).
    Error,
    /// A frame with an unknown type tag, then a HEALTH_RESPONSE whose
    /// payload is not JSON.
    Garbage,
    /// Nothing at all.
    Silent,
    /// A HEALTH_RESPONSE whose first two bytes go out at once and the rest
    /// after the delay.
    Split(Duration),
}

/// How a programmable backend answers HELLO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    Ack,
    /// ERROR(403) instead of ACK.
    Reject,
    /// Nothing at all.
    Ignore,
    /// ACK, then never read from the connection again.
    AckThenStall,
}

/// In-memory backend whose health replies are scripted by the test.
#[derive(Clone)]
pub struct ProgrammableBackend {
    pub addr: String,
    net: MemoryNetwork,
    mode: Arc<Mutex<Reply>>,
    handshake: Arc<Mutex<Handshake>>,
    script: Arc<Mutex<VecDeque<Reply>>>,
    received: Arc<Mutex<Vec<MessageType>>>,
    hellos: Arc<AtomicU32>,
    cancel: Arc<Mutex<CancellationToken>>,
}

impl ProgrammableBackend {
    pub fn new(net: &MemoryNetwork, addr: &str) -> Self {
        Self {
            addr: addr.to_string(),
            net: net.clone(),
            mode: Arc::new(Mutex::new(Reply::Healthy)),
            handshake: Arc::new(Mutex::new(Handshake::Ack)),
            script: Arc::new(Mutex::new(VecDeque::new())),
            received: Arc::new(Mutex::new(Vec::new())),
            hellos: Arc::new(AtomicU32::new(0)),
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
        }
    }

    /// Create and start accepting connections.
    pub fn start(net: &MemoryNetwork, addr: &str) -> Self {
        let backend = Self::new(net, addr);
        backend.listen();
        backend
    }

    pub fn listen(&self) {
        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();

        let mut listener = self.net.listen(&self.addr);
        let backend = self.clone();
        tokio::spawn(async move {
            loop {
                let stream = tokio::select! {
                    _ = token.cancelled() => return,
                    stream = listener.accept() => match stream {
                        Some(stream) => stream,
                        None => return,
                    },
                };
                let backend = backend.clone();
                let token = token.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = token.cancelled() => {}
                        _ = backend.serve(stream) => {}
                    }
                });
            }
        });
    }

    /// Stop accepting and drop every open connection.
    pub fn stop(&self) {
        self.net.unlisten(&self.addr);
        self.cancel.lock().cancel();
    }

    pub fn set_mode(&self, mode: Reply) {
        *self.mode.lock() = mode;
    }

    pub fn set_handshake(&self, handshake: Handshake) {
        *self.handshake.lock() = handshake;
    }

    /// Replies used, in order, before falling back to the mode.
    pub fn script(&self, replies: impl IntoIterator<Item = Reply>) {
        self.script.lock().extend(replies);
    }

    pub fn received(&self) -> Vec<MessageType> {
        self.received.lock().clone()
    }

    pub fn count(&self, mtype: MessageType) -> usize {
        self.received.lock().iter().filter(|m| **m == mtype).count()
    }

    pub fn hellos(&self) -> u32 {
        self.hellos.load(Ordering::SeqCst)
    }

    fn next_reply(&self) -> Reply {
        self.script.lock().pop_front().unwrap_or(*self.mode.lock())
    }

    async fn serve(&self, stream: DuplexStream) {
        let (read_half, mut writer) = tokio::io::split(stream);
        let mut reader = PduReader::new(read_half);

        while let Ok(pdu) = reader.read_pdu().await {
            self.received.lock().push(pdu.mtype);
            let reply = match Message::from_pdu(&pdu) {
                Ok(Message::Hello(hello)) => {
                    let handshake = *self.handshake.lock();
                    match handshake {
                        Handshake::Reject => Some(Message::error(403, "not accepting sessions")),
                        Handshake::Ignore => None,
                        Handshake::Ack | Handshake::AckThenStall => {
                            let n = self.hellos.fetch_add(1, Ordering::SeqCst);
                            let ack = Message::Ack(HelloAck {
                                confirmed_metrics: hello.supported_metrics,
                                check_interval: hello.check_interval,
                                server_id: format!("{}#{}", self.addr, n),
                            });
                            let raw = ack.to_pdu().unwrap().encode().unwrap();
                            if writer.write_all(&raw).await.is_err() {
                                return;
                            }
                            if handshake == Handshake::AckThenStall {
                                std::future::pending::<()>().await;
                            }
                            None
                        }
                    }
                }
                Ok(Message::HealthRequest) => match self.next_reply() {
                    Reply::Healthy => Some(healthy_report()),
                    Reply::Error => Some(Message::error(500, "injected failure")),
                    Reply::Silent => None,
                    Reply::Split(delay) => {
                        let raw = healthy_report().to_pdu().unwrap().encode().unwrap();
                        let _ = writer.write_all(&raw[..2]).await;
                        tokio::time::sleep(delay).await;
                        let _ = writer.write_all(&raw[2..]).await;
                        None
                    }
                    Reply::Garbage => {
                        let raw = Pdu::new(MessageType::HealthResponse, &b"not json"[..])
                            .encode()
                            .unwrap();
                        let _ = writer.write_all(&[0xEE, 0x00, 0x02, b'?', b'?']).await;
                        let _ = writer.write_all(&raw).await;
                        None
                    }
                },
                Ok(Message::ConfigUpdate(_)) => Some(Message::ConfigAck(ConfigAck {
                    update_status: "success".into(),
                    message: "Configuration updated successfully.".into(),
                })),
                Ok(Message::Terminate) => {
                    let ack = Message::TerminateAck(TerminateAck {
                        message: "Session terminated successfully.".into(),
                    });
                    let _ = writer.write_all(&ack.to_pdu().unwrap().encode().unwrap()).await;
                    let _ = writer.shutdown().await;
                    return;
                }
                _ => Some(Message::error(404, "Unknown message type.")),
            };

            if let Some(reply) = reply {
                let raw = reply.to_pdu().unwrap().encode().unwrap();
                if writer.write_all(&raw).await.is_err() {
                    return;
                }
            }
        }
    }
}

fn healthy_report() -> Message {
    Message::HealthResponse(HealthReport {
        timestamp: "2024-01-01T00:00:00Z".into(),
        metrics: [("cpu_usage_percent".to_string(), 1.0)].into_iter().collect(),
    })
}

/// Short intervals so scenarios finish quickly on a paused clock.
pub fn fast_config(servers: &[&str]) -> BalancerConfig {
    let mut config = BalancerConfig::default();
    config.pool.servers = servers.iter().map(|s| s.to_string()).collect();
    config.pool.max_fail_attempts = 3;
    config.pool.check_interval_secs = 1;
    config.pool.reconnect_interval_secs = 2;
    config.session.check_interval_secs = 1;
    config.timeouts.connect_secs = 1;
    config.timeouts.io_secs = 1;
    config.timeouts.terminate_secs = 1;
    config
}

/// Poll the pool status until `done` holds, for at most `within`.
pub async fn wait_for<F>(handle: &PoolHandle, within: Duration, mut done: F) -> PoolStatus
where
    F: FnMut(&PoolStatus) -> bool,
{
    let deadline = tokio::time::Instant::now() + within;
    loop {
        let status = handle.status();
        if done(&status) {
            return status;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not reached within {:?}; last status {:?}", within, status);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
