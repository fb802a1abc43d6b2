//! Tunnel listener: the endpoint agents dial into.
//!
//! Each accepted connection is one agent for its whole lifetime. The write
//! half goes to the registry; the read half stays here, feeding the frame
//! decoder and dispatching decoded envelopes. Any read error, EOF, or
//! framing violation ends the connection, unregisters the agent and fails
//! its in-flight requests.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use backhaul_proto::{Envelope, FrameDecoder};

use crate::Broker;

/// Read buffer size for the per-agent read loop.
const READ_BUF_SIZE: usize = 64 * 1024;

/// Accept loop for the tunnel listener.
pub async fn serve(listener: TcpListener, tls: Option<TlsAcceptor>, broker: Arc<Broker>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(peer = %peer, "tunnel connection accepted");
                let broker = Arc::clone(&broker);
                let tls = tls.clone();
                tokio::spawn(async move {
                    match tls {
                        Some(acceptor) => match acceptor.accept(stream).await {
                            Ok(tls_stream) => handle_agent(tls_stream, broker).await,
                            Err(e) => {
                                warn!(peer = %peer, error = %e, "TLS handshake failed on tunnel listener");
                            }
                        },
                        None => handle_agent(stream, broker).await,
                    }
                });
            }
            Err(e) => error!(error = %e, "failed to accept tunnel connection"),
        }
    }
}

async fn handle_agent<S>(stream: S, broker: Arc<Broker>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, writer) = tokio::io::split(stream);
    let handle = broker.registry.register(Box::new(writer)).await;
    let agent_id = handle.id().to_string();
    info!(agent_id = %agent_id, "agent connected");

    let mut decoder = FrameDecoder::new(broker.max_frame_bytes);
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                debug!(agent_id = %agent_id, "agent closed the tunnel");
                break;
            }
            Ok(n) => match decoder.push(&buf[..n]) {
                Ok(payloads) => {
                    for payload in payloads {
                        dispatch(&broker, &agent_id, &payload).await;
                    }
                }
                Err(e) => {
                    // The stream offset is unrecoverable after a framing
                    // violation; the connection has to go.
                    error!(agent_id = %agent_id, error = %e, "framing violation, dropping connection");
                    break;
                }
            },
            Err(e) => {
                warn!(agent_id = %agent_id, error = %e, "error reading from agent");
                break;
            }
        }
    }

    broker.registry.unregister(&agent_id).await;
    let failed = broker.tracker.fail_by_agent(&agent_id).await;
    info!(agent_id = %agent_id, failed_requests = failed, "agent disconnected");
}

async fn dispatch(broker: &Broker, agent_id: &str, payload: &[u8]) {
    match Envelope::from_payload(payload) {
        Ok(Envelope::Response(envelope)) => {
            let request_id = envelope.request_id.clone();
            let status = envelope.status_code;
            if broker.tracker.complete(envelope).await {
                debug!(agent_id, request_id = %request_id, status, "response delivered");
            } else {
                warn!(agent_id, request_id = %request_id, "response without matching request, discarding");
            }
        }
        Ok(Envelope::Request(_)) => {
            warn!(agent_id, "unexpected request envelope from agent, discarding");
        }
        Err(e) => warn!(agent_id, error = %e, "malformed envelope, skipping frame"),
    }
}
