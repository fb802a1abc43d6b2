//! The tunnel loop: Disconnected → Dialing → Connected, forever.
//!
//! One reader task per connection feeds the frame decoder; each decoded
//! request envelope is handled in its own task so slow origins never stall
//! the tunnel. Responses are written back through a shared send lock, and
//! responses racing a dead socket are dropped — the broker fails their
//! requests on disconnect anyway.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::TlsConnector;
use tracing::{debug, error, info, warn};

use backhaul_common::{tls, Config};
use backhaul_proto::{Envelope, FrameDecoder, RequestEnvelope};

use crate::upstream::Upstream;
use crate::{AgentError, Result};

/// Read buffer size for the tunnel read loop.
const READ_BUF_SIZE: usize = 64 * 1024;

/// Boxed write half of the tunnel socket (plain TCP or TLS).
type TunnelWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Run the agent against the configured broker. Redials forever; only
/// startup problems (bad rewrite pattern, bad default target, unusable TLS
/// material) return an error.
pub async fn run(config: &Config) -> Result<()> {
    let upstream = Arc::new(Upstream::new(&config.client.proxy)?);

    let tls = if config.client.server.ssl.enabled {
        let connector = tls::tls_connector(&config.client.server.ssl)?;
        let server_name = ServerName::try_from(config.client.server.host.clone())
            .map_err(|_| AgentError::ServerName(config.client.server.host.clone()))?;
        Some((connector, server_name))
    } else {
        None
    };

    let addr = config.client.server.addr();
    let delay = Duration::from_millis(config.reconnection.delay);
    let max_frame = config.max_frame_bytes;

    loop {
        info!(addr = %addr, "dialing broker");
        let stream = match TcpStream::connect(&addr).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(addr = %addr, error = %e, "dial failed, retrying");
                tokio::time::sleep(delay).await;
                continue;
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "failed to set TCP_NODELAY");
        }

        let ended = match &tls {
            Some((connector, server_name)) => {
                match tls_connect(connector, server_name.clone(), stream).await {
                    Ok(tls_stream) => {
                        run_connection(tls_stream, Arc::clone(&upstream), max_frame).await
                    }
                    Err(e) => {
                        warn!(error = %e, "TLS handshake with broker failed, retrying");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                }
            }
            None => run_connection(stream, Arc::clone(&upstream), max_frame).await,
        };

        match ended {
            Ok(()) => info!("tunnel closed by broker, reconnecting"),
            Err(e) => warn!(error = %e, "tunnel connection lost, reconnecting"),
        }
        tokio::time::sleep(delay).await;
    }
}

async fn tls_connect(
    connector: &TlsConnector,
    server_name: ServerName<'static>,
    stream: TcpStream,
) -> std::io::Result<tokio_rustls::client::TlsStream<TcpStream>> {
    connector.connect(server_name, stream).await
}

/// Service one established tunnel connection until it ends.
async fn run_connection<S>(stream: S, upstream: Arc<Upstream>, max_frame: usize) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, writer) = tokio::io::split(stream);
    let writer: Arc<Mutex<TunnelWriter>> = Arc::new(Mutex::new(Box::new(writer)));

    info!("connected to broker");

    let mut decoder = FrameDecoder::new(max_frame);
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }

        for payload in decoder.push(&buf[..n])? {
            match Envelope::from_payload(&payload) {
                Ok(Envelope::Request(request)) => {
                    let upstream = Arc::clone(&upstream);
                    let writer = Arc::clone(&writer);
                    tokio::spawn(handle_request(request, upstream, writer));
                }
                Ok(Envelope::Response(_)) => {
                    warn!("unexpected response envelope from broker, discarding");
                }
                Err(e) => warn!(error = %e, "malformed envelope, skipping frame"),
            }
        }
    }
}

async fn handle_request(
    request: RequestEnvelope,
    upstream: Arc<Upstream>,
    writer: Arc<Mutex<TunnelWriter>>,
) {
    let response = upstream.handle(&request).await;
    let frame = match Envelope::Response(response).to_frame() {
        Ok(frame) => frame,
        Err(e) => {
            error!(request_id = %request.request_id, error = %e, "failed to encode response envelope");
            return;
        }
    };

    let mut writer = writer.lock().await;
    let written = async {
        writer.write_all(&frame).await?;
        writer.flush().await
    }
    .await;

    if let Err(e) = written {
        // The tunnel died while the upstream call was in flight; the
        // broker fails this request on disconnect.
        debug!(request_id = %request.request_id, error = %e, "dropping response, tunnel closed");
    }
}
