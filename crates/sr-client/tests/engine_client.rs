//! Engine client tests against a fake daemon on a loopback port

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use sr_client::EngineClient;
use sr_core::error::EngineError;
use sr_core::protocol::{EngineReply, EngineRequest};
use sr_core::traits::{ProbeTarget, SessionHandle, SessionRequest, TagDirection};
use sr_core::{ProxyEngine, RoutingMode, Server};

type Handler = Box<dyn Fn(&EngineRequest) -> Option<String> + Send + Sync>;

/// Daemon answering each request line with whatever `handler` returns.
/// `None` closes the connection without a reply.
async fn fake_daemon(handler: Handler) -> (String, Arc<Mutex<Vec<EngineRequest>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let handler = Arc::new(handler);

    let log = Arc::clone(&seen);
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let handler = Arc::clone(&handler);
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                let (reader, mut writer) = stream.into_split();
                let mut line = String::new();
                if BufReader::new(reader).read_line(&mut line).await.is_err() {
                    return;
                }
                let request: EngineRequest = serde_json::from_str(line.trim_end()).unwrap();
                let reply = handler(&request);
                log.lock().push(request);
                if let Some(mut reply) = reply {
                    reply.push('\n');
                    let _ = writer.write_all(reply.as_bytes()).await;
                }
            });
        }
    });

    (address, seen)
}

fn reply(envelope: EngineReply) -> Option<String> {
    Some(serde_json::to_string(&envelope).unwrap())
}

fn session_request() -> SessionRequest {
    SessionRequest {
        server: Server::new("Tokyo", "vmess", "192.0.2.10", 443),
        routing_mode: RoutingMode::DirectProxy,
        config: json!({ "outbounds": [] }),
    }
}

#[tokio::test]
async fn test_begin_session_returns_handle() {
    let (address, seen) = fake_daemon(Box::new(|request| match request {
        EngineRequest::BeginSession { .. } => {
            reply(EngineReply::ok(json!({ "session_id": "abc-123" })))
        }
        _ => reply(EngineReply::err("unexpected")),
    }))
    .await;

    let client = EngineClient::new(address);
    let handle = client.begin_session(&session_request()).await.unwrap();
    assert_eq!(handle, SessionHandle("abc-123".into()));

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    match &seen[0] {
        EngineRequest::BeginSession { config } => assert_eq!(config["outbounds"], json!([])),
        other => panic!("unexpected request {:?}", other),
    }
}

#[tokio::test]
async fn test_counters_decode() {
    let (address, _) = fake_daemon(Box::new(|_| {
        reply(EngineReply::ok(json!({ "upload": 1024, "download": 4096 })))
    }))
    .await;

    let report = EngineClient::new(address)
        .query_counters(&SessionHandle("s".into()))
        .await
        .unwrap();
    assert_eq!(report.totals.upload, 1024);
    assert_eq!(report.totals.download, 4096);
    assert!(report.tags.is_empty());
}

#[tokio::test]
async fn test_counters_decode_tags() {
    let (address, _) = fake_daemon(Box::new(|_| {
        reply(EngineReply::ok(json!({
            "upload": 1024,
            "download": 4096,
            "tags": [
                { "tag": "socks-in", "direction": "inbound", "upload": 512, "download": 2048 },
                { "tag": "proxy", "direction": "outbound", "upload": 1024, "download": 4096 }
            ]
        })))
    }))
    .await;

    let report = EngineClient::new(address)
        .query_counters(&SessionHandle("s".into()))
        .await
        .unwrap();
    assert_eq!(report.tags.len(), 2);
    assert_eq!(report.tags[0].tag, "socks-in");
    assert_eq!(report.tags[0].direction, TagDirection::Inbound);
    assert_eq!(report.tags[0].counters.download, 2048);
    assert_eq!(report.tags[1].direction, TagDirection::Outbound);
}

#[tokio::test]
async fn test_rejected_reply() {
    let (address, _) = fake_daemon(Box::new(|_| reply(EngineReply::err("no such session")))).await;

    let err = EngineClient::new(address)
        .end_session(&SessionHandle("gone".into()))
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::Rejected("no such session".into()));
}

#[tokio::test]
async fn test_garbage_reply_is_protocol_error() {
    let (address, _) = fake_daemon(Box::new(|_| Some("this is not json".to_string()))).await;

    let err = EngineClient::new(address).version().await.unwrap_err();
    assert!(matches!(err, EngineError::Protocol(_)));
}

#[tokio::test]
async fn test_missing_payload_is_protocol_error() {
    let (address, _) = fake_daemon(Box::new(|_| reply(EngineReply::empty()))).await;

    let err = EngineClient::new(address)
        .begin_session(&session_request())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Protocol(_)));
}

#[tokio::test]
async fn test_closed_without_reply_is_unavailable() {
    let (address, _) = fake_daemon(Box::new(|_| None)).await;

    let err = EngineClient::new(address)
        .close_all_interfaces()
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Unavailable(_)));
}

#[tokio::test]
async fn test_nothing_listening_is_unavailable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);

    let err = EngineClient::new(address).version().await.unwrap_err();
    assert!(matches!(err, EngineError::Unavailable(_)));
}

#[tokio::test]
async fn test_silent_daemon_times_out() {
    // Accepts but never answers
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let client = EngineClient::new(address).with_timeout(Duration::from_millis(200));
    let err = client.version().await.unwrap_err();
    assert_eq!(err, EngineError::Timeout(Duration::from_millis(200)));
}

#[tokio::test]
async fn test_probe_batch_over_the_wire() {
    let (address, seen) = fake_daemon(Box::new(|request| match request {
        EngineRequest::Probe { address, .. } if address == "192.0.2.1" => {
            reply(EngineReply::ok(json!({ "latency_ms": 88 })))
        }
        EngineRequest::Probe { .. } => reply(EngineReply::err("connection refused")),
        _ => reply(EngineReply::err("unexpected")),
    }))
    .await;

    let targets: Vec<ProbeTarget> = [
        Server::new("A", "vmess", "192.0.2.1", 443),
        Server::new("B", "vmess", "192.0.2.2", 443),
    ]
    .iter()
    .map(ProbeTarget::from)
    .collect();

    let mut results = EngineClient::new(address)
        .probe_batch(&targets, 2, Duration::from_secs(5))
        .await
        .unwrap();
    results.sort_by(|a, b| a.address.cmp(&b.address));

    assert!(results[0].succeeded);
    assert_eq!(results[0].latency_ms, Some(88));
    assert!(!results[1].succeeded);

    let seen = seen.lock();
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|r| matches!(
        r,
        EngineRequest::Probe {
            timeout_ms: 5000,
            ..
        }
    )));
}
