//! Backend-side protocol responder.
//!
//! # Responsibilities
//! - Answer HELLO with an ACK carrying a fresh identity
//! - Answer HEALTH_REQUEST with sampled metrics
//! - Apply CONFIG_UPDATE and acknowledge it
//! - Acknowledge TERMINATE and close the stream
//! - Answer anything else with ERROR
//!
//! # Design Decisions
//! - `respond` does no I/O; `serve` owns the stream
//! - A garbled frame gets an ERROR reply; only transport errors end the stream

use parking_lot::RwLock;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

use super::sampler::{Metrics, MetricsSampler};
use crate::protocol::{
    ConfigAck, ConfigUpdate, HealthReport, Hello, HelloAck, Message, PduError, PduReader,
    PduWriter, TerminateAck,
};

pub const ERROR_BAD_FRAME: i64 = 400;
pub const ERROR_UNKNOWN_TYPE: i64 = 404;
pub const ERROR_SAMPLING: i64 = 500;

/// Reply to one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Send(Message),
    /// Send, then close the stream.
    SendAndClose(Message),
}

/// Health-check settings negotiated with the balancer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ActiveSettings {
    pub metrics: Vec<String>,
    pub check_interval: u64,
}

pub struct Responder {
    id_prefix: String,
    sampler: Arc<dyn MetricsSampler>,
    settings: RwLock<ActiveSettings>,
}

impl Responder {
    pub fn new(id_prefix: impl Into<String>, sampler: Arc<dyn MetricsSampler>) -> Self {
        Self {
            id_prefix: id_prefix.into(),
            sampler,
            settings: RwLock::new(ActiveSettings::default()),
        }
    }

    pub fn settings(&self) -> ActiveSettings {
        self.settings.read().clone()
    }

    pub fn respond(&self, inbound: Message) -> Reply {
        match inbound {
            Message::Hello(hello) => Reply::Send(self.on_hello(hello)),
            Message::HealthRequest => Reply::Send(self.on_health_request()),
            Message::ConfigUpdate(update) => Reply::Send(self.on_config_update(update)),
            Message::Terminate => Reply::SendAndClose(Message::TerminateAck(TerminateAck {
                message: "Session terminated successfully.".to_string(),
            })),
            _ => Reply::Send(Message::error(ERROR_UNKNOWN_TYPE, "Unknown message type.")),
        }
    }

    fn on_hello(&self, hello: Hello) -> Message {
        {
            let mut settings = self.settings.write();
            settings.metrics = hello.supported_metrics.clone();
            settings.check_interval = hello.check_interval;
        }
        let server_id = format!("{}-{}", self.id_prefix, Uuid::new_v4());
        tracing::info!(server_id = %server_id, version = hello.version, "HELLO accepted");

        Message::Ack(HelloAck {
            confirmed_metrics: hello.supported_metrics,
            check_interval: hello.check_interval,
            server_id,
        })
    }

    fn on_health_request(&self) -> Message {
        match self.sampler.sample() {
            Ok(sampled) => Message::HealthResponse(HealthReport {
                timestamp: chrono::Utc::now().to_rfc3339(),
                metrics: self.select_metrics(sampled),
            }),
            Err(e) => {
                tracing::warn!(error = %e, "Health sampling failed");
                Message::error(ERROR_SAMPLING, e.to_string())
            }
        }
    }

    /// Keep the negotiated metrics; fall back to everything sampled when none match.
    fn select_metrics(&self, sampled: Metrics) -> Metrics {
        let settings = self.settings.read();
        let selected: Metrics = sampled
            .iter()
            .filter(|(name, _)| settings.metrics.contains(name))
            .map(|(name, value)| (name.clone(), *value))
            .collect();
        if selected.is_empty() {
            sampled
        } else {
            selected
        }
    }

    fn on_config_update(&self, update: ConfigUpdate) -> Message {
        {
            let mut settings = self.settings.write();
            settings.metrics = update.new_metrics.clone();
            settings.check_interval = update.new_check_interval;
        }
        tracing::info!(
            metrics = ?update.new_metrics,
            interval = update.new_check_interval,
            "Updated health check configuration"
        );
        Message::ConfigAck(ConfigAck {
            update_status: "success".to_string(),
            message: "Configuration updated successfully.".to_string(),
        })
    }

    /// Serve one stream until TERMINATE or a transport error.
    pub async fn serve<S>(&self, stream: S) -> Result<(), PduError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader = PduReader::new(read_half);
        let mut writer = PduWriter::new(write_half);

        loop {
            let pdu = match reader.read_pdu().await {
                Ok(pdu) => pdu,
                Err(PduError::Closed) => {
                    tracing::debug!("Peer closed stream");
                    return Ok(());
                }
                Err(e) if e.is_transport() => return Err(e),
                Err(e @ PduError::UnknownType(_)) => {
                    writer
                        .write_pdu(&Message::error(ERROR_UNKNOWN_TYPE, e.to_string()).to_pdu()?)
                        .await?;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Malformed frame");
                    writer
                        .write_pdu(&Message::error(ERROR_BAD_FRAME, e.to_string()).to_pdu()?)
                        .await?;
                    continue;
                }
            };

            tracing::debug!(mtype = %pdu.mtype, bytes = pdu.len(), "Data in");
            let reply = match Message::from_pdu(&pdu) {
                Ok(message) => self.respond(message),
                Err(e) => Reply::Send(Message::error(ERROR_BAD_FRAME, e.to_string())),
            };

            match reply {
                Reply::Send(message) => writer.write_pdu(&message.to_pdu()?).await?,
                Reply::SendAndClose(message) => {
                    writer.write_pdu(&message.to_pdu()?).await?;
                    writer.shutdown().await?;
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::sampler::{SampleError, StaticSampler};
    use crate::protocol::{MessageType, Pdu};
    use tokio::io::AsyncWriteExt;

    struct FailingSampler;

    impl MetricsSampler for FailingSampler {
        fn sample(&self) -> Result<Metrics, SampleError> {
            Err(SampleError("no data".into()))
        }
    }

    fn responder() -> Responder {
        Responder::new(
            "server",
            Arc::new(StaticSampler::new([
                ("cpu_usage_percent", 10.0),
                ("memory_usage_percent", 20.0),
            ])),
        )
    }

    fn hello(metrics: &[&str]) -> Message {
        Message::Hello(Hello {
            supported_metrics: metrics.iter().map(|m| m.to_string()).collect(),
            check_interval: 5,
            auth_token: "t".into(),
            version: 1.0,
        })
    }

    #[test]
    fn every_hello_gets_a_fresh_identity() {
        let responder = responder();
        let id = |reply| match reply {
            Reply::Send(Message::Ack(ack)) => ack.server_id,
            other => panic!("unexpected {:?}", other),
        };
        let a = id(responder.respond(hello(&["cpu_usage_percent"])));
        let b = id(responder.respond(hello(&["cpu_usage_percent"])));
        assert!(a.starts_with("server-"));
        assert_ne!(a, b);
    }

    #[test]
    fn health_response_is_filtered_to_negotiated_metrics() {
        let responder = responder();
        responder.respond(hello(&["cpu_usage_percent"]));
        match responder.respond(Message::HealthRequest) {
            Reply::Send(Message::HealthResponse(report)) => {
                assert_eq!(report.metrics.len(), 1);
                assert_eq!(report.metrics["cpu_usage_percent"], 10.0);
                assert!(chrono::DateTime::parse_from_rfc3339(&report.timestamp).is_ok());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn config_update_changes_settings() {
        let responder = responder();
        let reply = responder.respond(Message::ConfigUpdate(ConfigUpdate {
            new_metrics: vec!["memory_usage_percent".into()],
            new_check_interval: 9,
        }));
        assert!(matches!(reply, Reply::Send(Message::ConfigAck(ref ack)) if ack.update_status == "success"));
        assert_eq!(responder.settings().check_interval, 9);
        assert_eq!(responder.settings().metrics, vec!["memory_usage_percent".to_string()]);
    }

    #[test]
    fn sampling_failure_is_reported_as_error() {
        let responder = Responder::new("s", Arc::new(FailingSampler));
        assert!(matches!(
            responder.respond(Message::HealthRequest),
            Reply::Send(Message::Error(ref e)) if e.error_code == ERROR_SAMPLING
        ));
    }

    #[test]
    fn unknown_requests_get_error() {
        let responder = responder();
        assert!(matches!(
            responder.respond(Message::Data(bytes::Bytes::from_static(b"x"))),
            Reply::Send(Message::Error(ref e)) if e.error_code == ERROR_UNKNOWN_TYPE
        ));
        assert!(matches!(
            responder.respond(Message::Terminate),
            Reply::SendAndClose(Message::TerminateAck(_))
        ));
    }

    #[tokio::test]
    async fn serve_answers_garbage_and_keeps_going() {
        let (client, server) = tokio::io::duplex(4096);
        let responder = Arc::new(responder());
        let task = {
            let responder = responder.clone();
            tokio::spawn(async move { responder.serve(server).await })
        };

        let (read_half, mut write_half) = tokio::io::split(client);
        let mut reader = PduReader::new(read_half);

        // HEALTH_RESPONSE with a non-JSON payload: envelope is fine, payload is not.
        write_half
            .write_all(&Pdu::new(MessageType::HealthResponse, &b"??"[..]).encode().unwrap())
            .await
            .unwrap();
        let reply = reader.read_pdu().await.unwrap();
        assert_eq!(reply.mtype, MessageType::Error);

        write_half
            .write_all(&Pdu::empty(MessageType::HealthRequest).encode().unwrap())
            .await
            .unwrap();
        assert_eq!(
            reader.read_pdu().await.unwrap().mtype,
            MessageType::HealthResponse
        );

        write_half
            .write_all(&Pdu::empty(MessageType::Terminate).encode().unwrap())
            .await
            .unwrap();
        assert_eq!(
            reader.read_pdu().await.unwrap().mtype,
            MessageType::TerminateAck
        );
        assert!(task.await.unwrap().is_ok());
    }
}
