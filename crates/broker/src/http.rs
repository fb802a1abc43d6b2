//! Public HTTP(S) front-end.
//!
//! Each inbound request is marshalled into a request envelope, dispatched
//! over a connected agent's tunnel socket, and answered from whichever
//! resolution path wins: the agent's response envelope, the agent
//! disconnecting, or the request deadline.

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, warn};

use backhaul_proto::{Envelope, Headers, RequestEnvelope, ResponseEnvelope};

use crate::tracker::{FailReason, Outcome};
use crate::Broker;

/// Accept loop for the public listener. Accept errors are logged and do
/// not stop the loop; per-connection errors stay in their own task.
pub async fn serve(listener: TcpListener, tls: Option<TlsAcceptor>, broker: Arc<Broker>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let broker = Arc::clone(&broker);
                let tls = tls.clone();
                tokio::spawn(async move {
                    match tls {
                        Some(acceptor) => match acceptor.accept(stream).await {
                            Ok(tls_stream) => serve_connection(tls_stream, broker).await,
                            Err(e) => {
                                warn!(peer = %peer, error = %e, "TLS handshake failed on HTTP listener");
                            }
                        },
                        None => serve_connection(stream, broker).await,
                    }
                });
            }
            Err(e) => error!(error = %e, "failed to accept HTTP connection"),
        }
    }
}

async fn serve_connection<S>(stream: S, broker: Arc<Broker>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |req: Request<Incoming>| {
        let broker = Arc::clone(&broker);
        async move { Ok::<_, Infallible>(handle_request(broker, req).await) }
    });

    if let Err(e) = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .await
    {
        debug!(error = %e, "HTTP connection ended with error");
    }
}

async fn handle_request(broker: Arc<Broker>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let Some(agent) = broker.registry.pick().await else {
        warn!("no agents connected, rejecting request");
        return text_response(StatusCode::SERVICE_UNAVAILABLE, "No clients available");
    };

    let method = req.method().to_string();
    let url = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let mut headers = Headers::new();
    for name in req.headers().keys() {
        for value in req.headers().get_all(name) {
            match value.to_str() {
                Ok(v) => headers.append(name.as_str(), v),
                Err(_) => warn!(header = %name, "skipping non-UTF-8 header value"),
            }
        }
    }

    // Streaming request bodies are out of scope; the whole body rides in
    // the envelope.
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes().to_vec(),
        Err(e) => {
            warn!(error = %e, "failed to read request body");
            return text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error");
        }
    };

    let (request_id, mut completion) = broker.tracker.open(agent.id()).await;

    let envelope = Envelope::Request(RequestEnvelope {
        client_id: agent.id().to_string(),
        request_id: request_id.clone(),
        method,
        url,
        headers,
        body,
    });

    let frame = match envelope.to_frame() {
        Ok(frame) => frame,
        Err(e) => {
            error!(request_id = %request_id, error = %e, "failed to encode request envelope");
            broker.tracker.expire(&request_id).await;
            return text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error");
        }
    };

    debug!(request_id = %request_id, agent_id = %agent.id(), "request dispatched");

    if let Err(e) = agent.send(frame).await {
        warn!(agent_id = %agent.id(), error = %e, "write to agent failed, unregistering");
        broker.registry.unregister(agent.id()).await;
        // This request resolves as a client error; the agent's remaining
        // in-flight requests fail as disconnected.
        broker.tracker.expire(&request_id).await;
        broker.tracker.fail_by_agent(agent.id()).await;
        return failure_response(FailReason::ClientError);
    }

    let deadline = tokio::time::sleep(broker.request_timeout);
    tokio::pin!(deadline);

    tokio::select! {
        outcome = &mut completion => outcome_response(outcome, &request_id),
        _ = &mut deadline => {
            if broker.tracker.expire(&request_id).await {
                warn!(request_id = %request_id, "request timed out");
                failure_response(FailReason::Timeout)
            } else {
                // A resolution won the race against the deadline; its
                // outcome is already on the channel.
                outcome_response(completion.await, &request_id)
            }
        }
    }
}

fn outcome_response(
    outcome: Result<Outcome, oneshot::error::RecvError>,
    request_id: &str,
) -> Response<Full<Bytes>> {
    match outcome {
        Ok(Outcome::Response(envelope)) => {
            debug!(request_id = %request_id, status = envelope.status_code, "response relayed");
            response_from_envelope(envelope)
        }
        Ok(Outcome::Failed(reason)) => {
            warn!(request_id = %request_id, reason = reason.message(), "request failed");
            failure_response(reason)
        }
        Err(_) => {
            error!(request_id = %request_id, "completion channel dropped");
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    }
}

fn response_from_envelope(envelope: ResponseEnvelope) -> Response<Full<Bytes>> {
    let status =
        StatusCode::from_u16(envelope.status_code).unwrap_or(StatusCode::BAD_GATEWAY);

    let mut response = Response::new(Full::new(Bytes::from(envelope.body)));
    *response.status_mut() = status;

    let out = response.headers_mut();
    for (name, values) in envelope.headers.iter() {
        let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) else {
            warn!(header = name, "skipping invalid header name from agent");
            continue;
        };
        for value in values {
            match HeaderValue::from_str(value) {
                Ok(v) => {
                    out.append(header_name.clone(), v);
                }
                Err(_) => warn!(header = name, "skipping invalid header value from agent"),
            }
        }
    }

    response
}

fn failure_response(reason: FailReason) -> Response<Full<Bytes>> {
    let status =
        StatusCode::from_u16(reason.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    text_response(status, reason.message())
}

fn text_response(status: StatusCode, message: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(message.as_bytes())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
