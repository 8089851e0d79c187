//! Delivery server
//!
//! One query at a time: receive from the transport, route, build the answer,
//! send, repeat. Nothing that happens to a single query can stop the loop;
//! only the shutdown future does.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;

use crate::dns::{build_response, DnsMessage, RecordType};
use crate::router::{AddressKind, Resolved, Router};
use crate::transport::{InboundQuery, Transport};

/// Answers TXT queries from a read-only [`Router`]
pub struct DeliveryServer {
    router: Arc<Router>,
    nameserver: String,
}

impl DeliveryServer {
    pub fn new(router: Arc<Router>, nameserver: &str) -> Self {
        Self {
            router,
            nameserver: crate::router::normalize_name(nameserver),
        }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Build the response packet for `query`, or `None` to stay silent
    pub fn handle(&self, query: &DnsMessage, peer: SocketAddr) -> Option<Vec<u8>> {
        let question = query.questions.first()?;
        if question.record_type() != Some(RecordType::TXT) {
            return None;
        }

        log::debug!("Received DNS query for {} from {}", question.qname, peer.ip());

        let Some(resolved) = self.router.resolve(&question.qname) else {
            log::debug!(
                "Query name {} did not match any served address",
                question.qname
            );
            return None;
        };

        log_delivery(&resolved, peer);

        match build_response(
            query,
            question,
            resolved.payload,
            self.router.zone(),
            &self.nameserver,
        ) {
            Ok(packet) => Some(packet),
            Err(e) => {
                log::warn!("Failed to build response for {}: {}", question.qname, e);
                None
            }
        }
    }

    /// Handle one inbound query and send the answer, if any
    pub async fn serve_one<T: Transport + ?Sized>(&self, transport: &T, inbound: InboundQuery) {
        let Some(packet) = self.handle(&inbound.message, inbound.envelope.src) else {
            return;
        };

        if let Err(e) = transport
            .send_response(&inbound.envelope.reversed(), &packet)
            .await
        {
            log::warn!("{:#}", e);
        }
    }

    /// Serve queries until `shutdown` completes
    pub async fn serve<T, S>(&self, transport: &T, shutdown: S) -> Result<()>
    where
        T: Transport + ?Sized,
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    log::info!("Exiting...");
                    return Ok(());
                }
                received = transport.recv_query() => match received {
                    Ok(inbound) => self.serve_one(transport, inbound).await,
                    Err(e) => log::warn!("Failed to receive DNS query: {:#}", e),
                },
            }
        }
    }
}

fn log_delivery(resolved: &Resolved<'_>, peer: SocketAddr) {
    let address = &resolved.address;
    let mode = address.mode.map(|m| m.as_str()).unwrap_or_default();
    let index = address.index.unwrap_or_default();

    match address.kind {
        AddressKind::Launcher => log::info!(
            "Delivering {} {} launcher to {}",
            address.label,
            mode,
            peer.ip()
        ),
        AddressKind::StagerChunk => log::info!(
            "Delivering {} {} stager {}/{} to {}",
            address.label,
            mode,
            index,
            resolved.total,
            peer.ip()
        ),
        AddressKind::FileChunk => log::info!(
            "Delivering {} chunk {}/{} to {}",
            address.label,
            index,
            resolved.total,
            peer.ip()
        ),
    }
}

/// Resolves on SIGINT, or SIGTERM on Unix
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                log::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::chunk::ChunkSize;
    use crate::dns::ANSWER_TTL;
    use crate::stager::{StagerContext, Target};
    use crate::transport::Envelope;
    use async_trait::async_trait;
    use tokio::sync::{mpsc, Mutex};

    fn server() -> DeliveryServer {
        let size = ChunkSize::new(4).unwrap();
        let catalog = Catalog::from_files([("payload.bin", &[0xde, 0xad, 0xbe, 0xef][..])], size);
        let ctx = StagerContext {
            target: Target::Bash,
            zone: "example.com".to_string(),
            nameserver: "ns1.example.com".to_string(),
            size,
        };
        DeliveryServer::new(Arc::new(Router::new(catalog, &ctx)), "NS1.example.com.")
    }

    fn peer() -> SocketAddr {
        "192.0.2.10:40000".parse().unwrap()
    }

    /// Channel-backed transport; queries are fed in, responses collected
    struct ChannelTransport {
        queries: Mutex<mpsc::UnboundedReceiver<Result<InboundQuery>>>,
        sent: mpsc::UnboundedSender<(Envelope, Vec<u8>)>,
    }

    #[async_trait]
    impl Transport for ChannelTransport {
        async fn recv_query(&self) -> Result<InboundQuery> {
            match self.queries.lock().await.recv().await {
                Some(query) => query,
                None => std::future::pending().await,
            }
        }

        async fn send_response(&self, envelope: &Envelope, packet: &[u8]) -> Result<()> {
            self.sent.send((*envelope, packet.to_vec()))?;
            Ok(())
        }
    }

    #[test]
    fn test_handle_file_chunk() {
        let server = server();
        let query = DnsMessage::new_query("payload-bin.2.example.com", 0x0102);

        let packet = server.handle(&query, peer()).unwrap();
        let response = DnsMessage::parse(&packet).unwrap();

        assert_eq!(response.header.id, 0x0102);
        assert_eq!(response.get_txt_answer().unwrap(), b"7w==");
        assert_eq!(response.answers[0].ttl, ANSWER_TTL);
        assert_eq!(
            response.authorities[0].get_ns_name().unwrap(),
            "ns1.example.com"
        );
    }

    #[test]
    fn test_handle_silent_on_miss() {
        let server = server();
        for name in ["nope.example.com", "payload-bin.3.example.com", "payload-bin.0.example.com"] {
            let query = DnsMessage::new_query(name, 1);
            assert!(server.handle(&query, peer()).is_none());
        }

        let mut a = DnsMessage::new_query("payload-bin.1.example.com", 1);
        a.questions[0].qtype = RecordType::A as u16;
        assert!(server.handle(&a, peer()).is_none());
    }

    #[test]
    fn test_handle_is_idempotent() {
        let server = server();
        let query = DnsMessage::new_query("payload-bin.exec.1.example.com", 9);
        assert_eq!(server.handle(&query, peer()), server.handle(&query, peer()));
    }

    #[tokio::test]
    async fn test_serve_until_shutdown() {
        let (query_tx, query_rx) = mpsc::unbounded_channel();
        let (sent_tx, mut sent_rx) = mpsc::unbounded_channel();
        let transport = ChannelTransport {
            queries: Mutex::new(query_rx),
            sent: sent_tx,
        };

        let envelope = Envelope {
            src: peer(),
            dst: "198.51.100.1:53".parse().unwrap(),
        };
        query_tx
            .send(Err(anyhow::anyhow!("Failed to receive UDP datagram")))
            .unwrap();
        for name in ["unknown.example.com", "payload-bin.1.example.com"] {
            query_tx
                .send(Ok(InboundQuery {
                    envelope,
                    message: DnsMessage::new_query(name, 7),
                }))
                .unwrap();
        }

        let server = server();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let serve = server.serve(&transport, async {
            let _ = stop_rx.await;
        });
        let driver = async {
            let (reply_envelope, packet) = sent_rx.recv().await.unwrap();
            stop_tx.send(()).unwrap();
            (reply_envelope, packet)
        };

        let (result, (reply_envelope, packet)) = tokio::join!(serve, driver);
        assert!(result.is_ok());

        assert_eq!(reply_envelope, envelope.reversed());
        let response = DnsMessage::parse(&packet).unwrap();
        assert_eq!(response.get_txt_answer().unwrap(), b"3q2+");

        // The receive error did not stop the loop; only the matching query was answered
        assert!(sent_rx.try_recv().is_err());
    }
}
