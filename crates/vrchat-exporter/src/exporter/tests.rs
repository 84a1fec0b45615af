//! Tests for metrics exporter.

use assert_matches::assert_matches;
use async_trait::async_trait;
use http_body_util::{BodyExt as _, Empty};
use hyper::{body::Bytes, HeaderMap, Method, Uri};
use hyper_util::{
    client::legacy::Client,
    rt::{TokioExecutor, TokioIo},
};
use tokio::{runtime::Handle, sync::mpsc};
use tracing::subscriber::Subscriber;
use tracing_capture::{CaptureLayer, SharedStorage};
use tracing_subscriber::layer::SubscriberExt;
use vrchat_api::Friend;

use std::{
    net::Ipv4Addr,
    sync::atomic::{AtomicUsize, Ordering},
};

use super::*;
use crate::collector::{
    tests::{friend, MockSource},
    ContactSource, PresenceCollector,
};

const TEST_TIMEOUT: Duration = Duration::from_secs(3);
const SAMPLE_LINE: &str =
    r#"vrchat_user_online{username="Ann",location="world:123",status="online",status_desc=""} 1"#;

fn exporter_for(source: Arc<dyn ContactSource>) -> MetricsExporter {
    let mut registry = Registry::default();
    PresenceCollector::new(source, Handle::current()).register(&mut registry);
    MetricsExporter::new(Arc::new(registry))
}

async fn start_server(exporter: MetricsExporter) -> SocketAddr {
    let server = exporter
        .bind((Ipv4Addr::LOCALHOST, 0).into())
        .await
        .unwrap();
    let local_addr = server.local_addr();
    tokio::spawn(server.start());
    local_addr
}

async fn scrape(local_addr: SocketAddr, path: &str) -> (StatusCode, HeaderMap, String) {
    let client = Client::builder(TokioExecutor::new()).build_http::<Empty<Bytes>>();
    let uri: Uri = format!("http://{local_addr}{path}").parse().unwrap();
    let response = tokio::time::timeout(TEST_TIMEOUT, client.get(uri))
        .await
        .expect("timed out scraping metrics")
        .unwrap();

    let (parts, body) = response.into_parts();
    let body = body.collect().await.unwrap().to_bytes();
    let body = String::from_utf8(body.to_vec()).unwrap();
    (parts.status, parts.headers, body)
}

#[tokio::test]
async fn serving_metrics() {
    let source = MockSource::new(vec![friend("Ann", "world:123", "online", "")]);
    let local_addr = start_server(exporter_for(source.clone())).await;

    let (status, headers, body) = scrape(local_addr, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[&header::CONTENT_TYPE], OPEN_METRICS_CONTENT_TYPE);
    let lines: Vec<_> = body.lines().collect();
    assert!(lines.contains(&SAMPLE_LINE), "{lines:#?}");
    assert!(lines.contains(&"# TYPE vrchat_user_online gauge"), "{lines:#?}");
    assert_eq!(source.fetch_count(), 1);

    scrape(local_addr, "/metrics").await;
    assert_eq!(source.fetch_count(), 2);
}

#[tokio::test]
async fn unknown_paths_are_not_found() {
    let source = MockSource::new(vec![friend("Ann", "world:123", "online", "")]);
    let local_addr = start_server(exporter_for(source.clone())).await;

    for path in ["/", "/metrics/extra", "/favicon.ico"] {
        let (status, _, _) = scrape(local_addr, path).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{path}");
    }
    assert_eq!(source.fetch_count(), 0);
}

#[tokio::test]
async fn scraping_with_failing_source() {
    let source = MockSource::failing("API is down");
    let local_addr = start_server(exporter_for(source.clone())).await;

    for _ in 0..2 {
        let (status, _, body) = scrape(local_addr, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.lines().all(|line| line.starts_with('#')), "{body}");
    }
    assert_eq!(source.fetch_count(), 2);
}

/// Source returning a single friend whose name reflects the fetch ordinal.
#[derive(Debug, Default)]
struct SequenceSource {
    counter: AtomicUsize,
}

#[async_trait]
impl ContactSource for SequenceSource {
    async fn fetch_contacts(&self) -> anyhow::Result<Vec<Friend>> {
        let ordinal = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(vec![friend(&format!("user{ordinal}"), "world:1", "active", "")])
    }
}

#[tokio::test]
async fn concurrent_scrapes_fetch_independently() {
    let source = Arc::new(SequenceSource::default());
    let local_addr = start_server(exporter_for(source.clone())).await;

    let ((first_status, _, first_body), (second_status, _, second_body)) = tokio::join!(
        scrape(local_addr, "/metrics"),
        scrape(local_addr, "/metrics")
    );
    assert_eq!(first_status, StatusCode::OK);
    assert_eq!(second_status, StatusCode::OK);
    assert_eq!(source.counter.load(Ordering::SeqCst), 2);

    let reported_user = |body: &str| {
        let users: Vec<_> = ["user0", "user1"]
            .into_iter()
            .filter(|user| body.contains(&format!("username=\"{user}\"")))
            .collect();
        assert_eq!(users.len(), 1, "{body}");
        users[0]
    };
    assert_ne!(reported_user(&first_body), reported_user(&second_body));
}

#[derive(Debug)]
struct PushRequest {
    received_at: Instant,
    method: Method,
    path: String,
    headers: HeaderMap,
    body: Bytes,
}

/// Starts a mock push gateway responding with `statuses` in order (and 503 afterwards).
async fn spawn_mock_gateway(
    statuses: Vec<StatusCode>,
) -> (SocketAddr, mpsc::UnboundedReceiver<PushRequest>) {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let local_addr = listener.local_addr().unwrap();
    let (req_sender, req_receiver) = mpsc::unbounded_channel();
    let statuses = Arc::new(statuses);
    let request_counter = Arc::new(AtomicUsize::new(0));

    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let req_sender = req_sender.clone();
            let statuses = Arc::clone(&statuses);
            let request_counter = Arc::clone(&request_counter);
            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let req_sender = req_sender.clone();
                    let idx = request_counter.fetch_add(1, Ordering::SeqCst);
                    let status = statuses
                        .get(idx)
                        .copied()
                        .unwrap_or(StatusCode::SERVICE_UNAVAILABLE);
                    async move {
                        let received_at = Instant::now();
                        let (parts, body) = req.into_parts();
                        let body = body.collect().await?.to_bytes();
                        req_sender
                            .send(PushRequest {
                                received_at,
                                method: parts.method,
                                path: parts.uri.path().to_owned(),
                                headers: parts.headers,
                                body,
                            })
                            .ok();

                        let body = if status.is_success() {
                            String::new()
                        } else {
                            "Mistake!".to_owned()
                        };
                        Ok::<_, hyper::Error>(Response::builder().status(status).body(body).unwrap())
                    }
                });
                http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await
                    .ok();
            });
        }
    });
    (local_addr, req_receiver)
}

fn tracing_subscriber(storage: &SharedStorage) -> impl Subscriber {
    tracing_subscriber::fmt()
        .pretty()
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .finish()
        .with(CaptureLayer::new(storage))
}

#[tokio::test]
async fn using_push_gateway() {
    const INTERVAL: Duration = Duration::from_millis(100);

    let tracing_storage = SharedStorage::default();
    let _subscriber_guard = tracing::subscriber::set_default(tracing_subscriber(&tracing_storage));
    // ^ **NB.** `set_default()` only works because tests use a single-threaded Tokio runtime

    let (local_addr, mut req_receiver) =
        spawn_mock_gateway(vec![StatusCode::OK, StatusCode::SERVICE_UNAVAILABLE]).await;
    let source = MockSource::new(vec![friend("Ann", "world:123", "online", "")]);
    let exporter = exporter_for(source.clone());

    let endpoint = format!("http://{local_addr}/").parse().unwrap();
    let gateway = PushGateway::new(endpoint, INTERVAL)
        .with_basic_auth("user".to_owned(), "pass".to_owned());
    let err = tokio::time::timeout(TEST_TIMEOUT, exporter.push_to_gateway(gateway))
        .await
        .expect("timed out waiting for push to fail")
        .unwrap_err();

    assert_matches!(
        &err,
        PushError::Rejected { status, body, .. }
            if *status == StatusCode::SERVICE_UNAVAILABLE && body == "Mistake!"
    );
    assert_eq!(source.fetch_count(), 2);

    let first_push = req_receiver.recv().await.unwrap();
    let second_push = req_receiver.recv().await.unwrap();
    assert!(req_receiver.try_recv().is_err(), "failed push was retried");
    for push in [&first_push, &second_push] {
        assert_eq!(push.method, Method::POST);
        assert_eq!(push.path, "/metrics/job/vrchat_exporter");
        assert_eq!(push.headers[&header::CONTENT_TYPE], PROMETHEUS_CONTENT_TYPE);
        assert_eq!(push.headers[&header::AUTHORIZATION], "Basic dXNlcjpwYXNz");
        let body = str::from_utf8(&push.body).unwrap();
        assert!(body.lines().any(|line| line == SAMPLE_LINE), "{body}");
    }
    assert!(second_push.received_at - first_push.received_at >= INTERVAL);

    assert_logs(&tracing_storage.lock());
}

fn assert_logs(tracing_storage: &tracing_capture::Storage) {
    let push_confirmations: Vec<_> = tracing_storage
        .all_events()
        .filter(|event| {
            event
                .message()
                .is_some_and(|message| message.starts_with("Metrics pushed to"))
        })
        .collect();
    // Only the first push succeeded.
    assert_eq!(push_confirmations.len(), 1);

    let confirmation: &tracing_capture::CapturedEvent = &push_confirmations[0];
    assert_eq!(*confirmation.metadata().level(), tracing::Level::INFO);
    assert!(confirmation["endpoint"]
        .as_debug_str()
        .unwrap()
        .starts_with("http://127.0.0.1:"));
}

#[tokio::test]
async fn push_without_basic_auth() {
    let (local_addr, mut req_receiver) = spawn_mock_gateway(vec![StatusCode::ACCEPTED]).await;
    let exporter = exporter_for(MockSource::new(vec![]));

    let endpoint = format!("http://{local_addr}").parse().unwrap();
    let gateway = PushGateway::new(endpoint, Duration::from_millis(10));
    let err = tokio::time::timeout(TEST_TIMEOUT, exporter.push_to_gateway(gateway))
        .await
        .expect("timed out waiting for push to fail")
        .unwrap_err();
    assert_matches!(err, PushError::Rejected { .. });

    let first_push = req_receiver.recv().await.unwrap();
    assert!(!first_push.headers.contains_key(header::AUTHORIZATION));
    let body = str::from_utf8(&first_push.body).unwrap();
    assert!(body.contains("# TYPE vrchat_user_online gauge"), "{body}");
}

#[tokio::test]
async fn unreachable_push_gateway_is_fatal() {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let local_addr = listener.local_addr().unwrap();
    drop(listener);

    let source = MockSource::new(vec![]);
    let exporter = exporter_for(source.clone());
    let endpoint = format!("http://{local_addr}/").parse().unwrap();
    let gateway = PushGateway::new(endpoint, Duration::from_secs(60));
    let err = tokio::time::timeout(TEST_TIMEOUT, exporter.push_to_gateway(gateway))
        .await
        .expect("timed out waiting for push to fail")
        .unwrap_err();

    assert_matches!(err, PushError::Transport { endpoint, .. } if endpoint.ends_with("/metrics/job/vrchat_exporter"));
    assert_eq!(source.fetch_count(), 1);
}

#[test]
fn push_url() {
    let interval = Duration::from_secs(60);
    for endpoint in ["https://gateway.example.com", "https://gateway.example.com/"] {
        let gateway = PushGateway::new(endpoint.parse().unwrap(), interval);
        assert_eq!(
            gateway.push_url(),
            "https://gateway.example.com/metrics/job/vrchat_exporter"
        );
    }

    let gateway = PushGateway::new(
        "https://prom.example.net/api/prom/push".parse().unwrap(),
        interval,
    );
    assert_eq!(
        gateway.push_url(),
        "https://prom.example.net/api/prom/push/metrics/job/vrchat_exporter"
    );
}
