use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use codec::{decode_body, encode_body, CodecRegistry};
use common::cancellation::race_cancellation;
use common::futures::FutureExt;
use common::Context;
use transport::{Message, Socket};

use crate::model::{EndpointEntry, HandlerKind};
use crate::registration::InFlight;
use crate::stream::ServerStream;

pub(crate) type Handlers = common::async_std::sync::Mutex<HashMap<(String, String), Arc<EndpointEntry>>>;

/// Serves one accepted socket until the peer closes it or a fatal
/// protocol error occurs (§4.6 "Dispatch per socket").
///
/// A socket carries either a sequence of independent unary request/
/// response pairs (the client pools and reuses connections across
/// calls) or, once a `Vine-Stream` header is seen, is handed off to a
/// `StreamHandler` for the rest of its life.
pub(crate) async fn serve_socket(socket: Box<dyn Socket>, handlers: Arc<Handlers>, codecs: CodecRegistry, in_flight: Arc<InFlight>) {
    let socket: Arc<dyn Socket> = Arc::from(socket);

    loop {
        let message = match socket.recv().await {
            Ok(Some(m)) => m,
            _ => {
                let _ = socket.close().await;
                return;
            }
        };

        let service = message.header("Vine-Service").unwrap_or("").to_string();
        let method = message.header("Vine-Method").unwrap_or("").to_string();
        let request_id = message.header("Vine-Id").unwrap_or("").to_string();
        let content_type = message.header("Content-Type").unwrap_or(codec::JSON).to_string();
        let stream_id = message.header("Vine-Stream").map(|s| s.to_string());

        let codec = match codecs.get(&content_type) {
            Ok(c) => c,
            Err(e) => {
                write_error(&socket, &request_id, &e.to_string()).await;
                continue;
            }
        };

        let entry = {
            let map = handlers.lock().await;
            map.get(&(service.clone(), method.clone())).cloned()
        };

        let entry = match entry {
            Some(e) => e,
            None => {
                write_error(&socket, &request_id, &format!("no handler for {}.{}", service, method)).await;
                continue;
            }
        };

        let body = match decode_body(codec.as_ref(), &message.body) {
            Ok(v) => v,
            Err(e) => {
                write_error(&socket, &request_id, &e.to_string()).await;
                continue;
            }
        };

        // Install the request context with metadata propagated from
        // headers (§4.6 step 3): every `Vine-*`/user-supplied header
        // travels into the handler's `Context`. A `Timeout` header (§6,
        // nanoseconds on the wire) becomes the context's own deadline, so
        // a client-side cancellation cancels the handler too (§8 E6).
        let mut ctx = match message.header("Timeout").and_then(|t| t.parse::<u64>().ok()) {
            Some(nanos) => Context::with_timeout(Duration::from_nanos(nanos)),
            None => Context::background(),
        };
        for (k, v) in &message.headers {
            ctx = ctx.with_metadata(k.clone(), v.clone());
        }

        match (&entry.kind, stream_id) {
            (HandlerKind::Stream(handler), Some(sid)) => {
                let stream = ServerStream::new(socket.clone(), codec.clone(), service, method, sid);
                in_flight.enter().await;
                let _ = AssertUnwindSafe(handler.call(&ctx, body, stream)).catch_unwind().await;
                in_flight.exit().await;
                // A streaming socket is dedicated to this one call for its
                // whole lifetime (§4.5 "Streaming"): once the handler
                // returns, this connection is done.
                return;
            }
            (HandlerKind::Unary(handler), _) => {
                in_flight.enter().await;
                let call = AssertUnwindSafe(handler.call(&ctx, body)).catch_unwind();
                let result = race_cancellation(ctx.cancellation(), call).await;
                in_flight.exit().await;

                let response = match result {
                    Ok(Ok(Ok(value))) => value,
                    Ok(Ok(Err(e))) => {
                        write_error(&socket, &request_id, &e.to_string()).await;
                        continue;
                    }
                    Ok(Err(_panic)) => {
                        write_error(&socket, &request_id, "handler panicked").await;
                        continue;
                    }
                    Err(_timed_out) => {
                        write_error(&socket, &request_id, "request timed out").await;
                        continue;
                    }
                };

                let encoded = match encode_body(codec.as_ref(), &response) {
                    Ok(b) => b,
                    Err(e) => {
                        write_error(&socket, &request_id, &e.to_string()).await;
                        continue;
                    }
                };

                let mut headers = HashMap::new();
                headers.insert("Vine-Id".to_string(), request_id);
                headers.insert("Content-Type".to_string(), codec.content_type().to_string());

                if socket
                    .send(Message {
                        headers,
                        body: encoded.into(),
                    })
                    .await
                    .is_err()
                {
                    return;
                }
            }
            (HandlerKind::Stream(_), None) => {
                write_error(&socket, &request_id, "endpoint requires a stream").await;
            }
        }
    }
}

async fn write_error(socket: &Arc<dyn Socket>, request_id: &str, message: &str) {
    let mut headers = HashMap::new();
    headers.insert("Vine-Id".to_string(), request_id.to_string());
    headers.insert("Vine-Error".to_string(), message.to_string());
    let _ = socket
        .send(Message {
            headers,
            body: Default::default(),
        })
        .await;
}
