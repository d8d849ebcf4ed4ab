//! Integration tests running the client against real websocket servers
//! bound to ephemeral local ports.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, accept_hdr_async};

use gridfall_client::{BackoffPolicy, ClientConfig, GameClient, ReconnectPolicy};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gridfall_client=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Bind an ephemeral listener and return it with its `ws://` URL.
async fn bind_server() -> Result<(TcpListener, String)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let url = format!("ws://{}", listener.local_addr()?);
    Ok((listener, url))
}

fn test_config() -> ClientConfig {
    ClientConfig::default()
        .with_connect_timeout(Duration::from_secs(5))
        .with_probe_timeout(Duration::from_millis(500))
}

#[tokio::test]
async fn test_typed_subscriber_receives_payload() -> Result<()> {
    init_tracing();
    let (listener, url) = bind_server().await?;

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut ws = accept_async(stream).await.expect("handshake");
        let frame = json!({
            "type": "player_moved",
            "payload": {"x": 3, "y": 7}
        });
        ws.send(Message::Text(frame.to_string()))
            .await
            .expect("send");
        // Hold the connection open until the client is done
        while ws.next().await.is_some() {}
    });

    let client = GameClient::new(test_config().with_default_path(""));
    let (tx, mut rx) = mpsc::unbounded_channel();
    client.on_message_type("player_moved", move |payload| {
        tx.send(payload.clone()).expect("forward payload");
    });
    let other_hits = Arc::new(AtomicUsize::new(0));
    {
        let other_hits = Arc::clone(&other_hits);
        client.on_message_type("chat_message", move |_| {
            other_hits.fetch_add(1, Ordering::SeqCst);
        });
    }

    assert!(client.connect(Some(&url), None).await);
    assert!(client.is_connected());

    let payload = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await?
        .expect("payload delivered");
    assert_eq!(payload, json!({"x": 3, "y": 7}));
    assert_eq!(other_hits.load(Ordering::SeqCst), 0);

    client.disconnect();
    Ok(())
}

#[tokio::test]
async fn test_duplicate_connect_opens_single_socket() -> Result<()> {
    init_tracing();
    let (listener, url) = bind_server().await?;
    let connections = Arc::new(AtomicUsize::new(0));

    {
        let connections = Arc::clone(&connections);
        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(_) => return,
                };
                connections.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut ws = accept_async(stream).await.expect("handshake");
                    while ws.next().await.is_some() {}
                });
            }
        });
    }

    let client = GameClient::new(test_config().with_default_path(""));
    let (first, second) = tokio::join!(
        client.connect(Some(&url), None),
        client.connect(Some(&url), None)
    );
    assert!(first);
    assert!(second);
    assert!(client.is_connected());

    // Give any erroneous second handshake a moment to land
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(connections.load(Ordering::SeqCst), 1);

    client.disconnect();
    Ok(())
}

#[tokio::test]
async fn test_get_url_reports_exact_endpoint() -> Result<()> {
    init_tracing();
    let (listener, url) = bind_server().await?;

    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => return,
            };
            tokio::spawn(async move {
                let mut ws = accept_async(stream).await.expect("handshake");
                while ws.next().await.is_some() {}
            });
        }
    });

    // No pinned path: discovery probes the root candidate first and this
    // server accepts everything, so the effective URL is the base URL.
    let client = GameClient::new(test_config());
    assert!(client.connect(Some(&url), None).await);
    assert_eq!(client.get_url().as_deref(), Some(url.as_str()));

    client.disconnect();
    Ok(())
}

/// Server that accepts the handshake only on one path, rejecting the rest
/// with a 404 like a reverse proxy would. Counts handshake attempts.
fn spawn_path_gated_server(
    listener: TcpListener,
    accepted_path: &'static str,
) -> Arc<AtomicUsize> {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => return,
            };
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let gate = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                    if req.uri().path() == accepted_path {
                        Ok(resp)
                    } else {
                        let mut not_found = ErrorResponse::new(None);
                        *not_found.status_mut() = StatusCode::NOT_FOUND;
                        Err(not_found)
                    }
                };
                if let Ok(mut ws) = accept_hdr_async(stream, gate).await {
                    while ws.next().await.is_some() {}
                }
            });
        }
    });
    attempts
}

#[tokio::test]
async fn test_connectivity_probe_discovers_ws_path() -> Result<()> {
    init_tracing();
    let (listener, url) = bind_server().await?;
    let _attempts = spawn_path_gated_server(listener, "/ws");

    let client = GameClient::new(test_config());
    let discovered = client.test_connectivity(Some(&url)).await;
    assert_eq!(discovered.as_deref(), Some("/ws"));

    // And connect() performs the same discovery when no path is pinned
    assert!(client.connect(Some(&url), None).await);
    assert_eq!(client.get_url(), Some(format!("{url}/ws")));

    client.disconnect();
    Ok(())
}

#[tokio::test]
async fn test_connectivity_probe_exhausts_candidates() -> Result<()> {
    init_tracing();
    let (listener, url) = bind_server().await?;
    // Accepts only a path no candidate matches
    let attempts = spawn_path_gated_server(listener, "/nowhere");

    let client = GameClient::new(test_config());
    assert!(client.test_connectivity(Some(&url)).await.is_none());
    // Every candidate was tried before giving up
    assert!(attempts.load(Ordering::SeqCst) >= 2);
    Ok(())
}

#[tokio::test]
async fn test_server_close_reason_is_recorded() -> Result<()> {
    init_tracing();
    let (listener, url) = bind_server().await?;

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut ws = accept_async(stream).await.expect("handshake");
        ws.close(Some(CloseFrame {
            code: CloseCode::Away,
            reason: "Going away".into(),
        }))
        .await
        .expect("close");
        while ws.next().await.is_some() {}
    });

    let client = GameClient::new(test_config().with_default_path(""));
    let (tx, mut rx) = mpsc::unbounded_channel();
    client.on_disconnect(move |info| {
        tx.send(info.clone()).expect("forward close info");
    });

    assert!(client.connect(Some(&url), None).await);
    let info = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await?
        .expect("disconnect reported");
    assert_eq!(info.code, 1001);
    assert_eq!(info.reason, "Going away");
    assert!(info.was_clean);
    assert_eq!(client.last_close_info().map(|i| i.code), Some(1001));
    Ok(())
}

#[tokio::test]
async fn test_refused_connection_reports_error_not_panic() -> Result<()> {
    init_tracing();
    // Bind then drop to get a port nothing listens on
    let url = {
        let (listener, url) = bind_server().await?;
        drop(listener);
        url
    };

    let client = GameClient::new(test_config().with_default_path(""));
    let errors = Arc::new(Mutex::new(Vec::new()));
    {
        let errors = Arc::clone(&errors);
        client.on_error(move |e| {
            errors.lock().expect("errors lock").push(e.to_string());
        });
    }

    assert!(!client.connect(Some(&url), None).await);
    assert!(!client.is_connected());
    assert!(!errors.lock().expect("errors lock").is_empty());

    let info = client.last_close_info().expect("close info");
    assert_eq!(info.code, 1006);
    assert!(!info.was_clean);

    // Further operations on the failed client stay quiet
    client
        .send("chat_message", json!({"text": "hello"}))
        .disconnect();
    Ok(())
}

#[tokio::test]
async fn test_send_delivers_envelope_to_server() -> Result<()> {
    init_tracing();
    let (listener, url) = bind_server().await?;
    let (tx, mut rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut ws = accept_async(stream).await.expect("handshake");
        while let Some(Ok(message)) = ws.next().await {
            if let Message::Text(text) = message {
                tx.send(text).expect("forward frame");
            }
        }
    });

    let client = GameClient::new(test_config().with_default_path(""));
    assert!(client.connect(Some(&url), None).await);
    client.send("chat_message", json!({"text": "hello"}));

    let raw = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await?
        .expect("frame received");
    let frame: serde_json::Value = serde_json::from_str(&raw)?;
    assert_eq!(frame["type"], "chat_message");
    assert_eq!(frame["payload"]["text"], "hello");

    client.disconnect();
    Ok(())
}

#[tokio::test]
async fn test_intentional_disconnect_is_clean_and_idempotent() -> Result<()> {
    init_tracing();
    let (listener, url) = bind_server().await?;

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut ws = accept_async(stream).await.expect("handshake");
        while ws.next().await.is_some() {}
    });

    let client = GameClient::new(test_config().with_default_path(""));
    let disconnects = Arc::new(AtomicUsize::new(0));
    {
        let disconnects = Arc::clone(&disconnects);
        client.on_disconnect(move |_| {
            disconnects.fetch_add(1, Ordering::SeqCst);
        });
    }

    assert!(client.connect(Some(&url), None).await);
    client.disconnect().disconnect();

    assert!(!client.is_connected());
    let info = client.last_close_info().expect("close info");
    assert_eq!(info.code, 1000);
    assert!(info.was_clean);
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_disconnect_during_connect_attempt_stays_quiet() -> Result<()> {
    init_tracing();
    let (listener, url) = bind_server().await?;

    // Accept the TCP connection but never answer the handshake, so the
    // attempt can only end by timing out.
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        tokio::time::sleep(Duration::from_secs(10)).await;
        drop(stream);
    });

    let client = GameClient::new(
        test_config()
            .with_default_path("")
            .with_connect_timeout(Duration::from_millis(300)),
    );
    let errors = Arc::new(AtomicUsize::new(0));
    let disconnects = Arc::new(AtomicUsize::new(0));
    {
        let errors = Arc::clone(&errors);
        client.on_error(move |_| {
            errors.fetch_add(1, Ordering::SeqCst);
        });
    }
    {
        let disconnects = Arc::clone(&disconnects);
        client.on_disconnect(move |_| {
            disconnects.fetch_add(1, Ordering::SeqCst);
        });
    }

    let attempt = tokio::spawn({
        let client = client.clone();
        let url = url.clone();
        async move { client.connect(Some(&url), None).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(client.is_connecting());
    client.disconnect();

    // The abandoned attempt fails, but the failure was asked for: no error
    // or disconnect handlers fire.
    assert!(!attempt.await?);
    assert!(!client.is_connected());
    assert_eq!(errors.load(Ordering::SeqCst), 0);
    assert_eq!(disconnects.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn test_auto_reconnect_after_unexpected_close() -> Result<()> {
    init_tracing();
    let (listener, url) = bind_server().await?;
    let connections = Arc::new(AtomicUsize::new(0));

    {
        let connections = Arc::clone(&connections);
        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(_) => return,
                };
                let nth = connections.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut ws = accept_async(stream).await.expect("handshake");
                    if nth == 0 {
                        // Drop the first connection without a close frame
                        return;
                    }
                    while ws.next().await.is_some() {}
                });
            }
        });
    }

    let policy = BackoffPolicy {
        initial_delay: Duration::from_millis(50),
        max_delay: Duration::from_millis(200),
        multiplier: 2.0,
        max_attempts: 5,
    };
    let client = GameClient::new(
        test_config()
            .with_default_path("")
            .with_reconnect(ReconnectPolicy::Backoff(policy)),
    );

    assert!(client.connect(Some(&url), None).await);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if connections.load(Ordering::SeqCst) >= 2 && client.is_connected() {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "client did not reconnect in time"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    client.disconnect();
    Ok(())
}
