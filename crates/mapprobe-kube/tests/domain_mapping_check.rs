//! `DomainMappingCheck::run` against a mocked API server: the request
//! sequence on success, and cleanup after readiness failures and
//! cancellation.

use std::net::SocketAddr;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use http::{Method, Request, Response, StatusCode};
use kube::client::Body;
use kube::Client;
use mapprobe_core::{CancellationToken, Error, RetryConfig, Scheme};
use mapprobe_kube::{CheckConfig, DomainMappingCheck, KubeError};
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type ApiServerHandle = tower_test::mock::Handle<Request<Body>, Response<Body>>;

const COLLECTION: &str =
    "/apis/serving.knative.dev/v1beta1/namespaces/serving-tests/domainmappings";
const HOST: &str = "hello.example.org";

struct ApiServerVerifier(ApiServerHandle);

enum Scenario {
    /// Create, a ready GET, then delete.
    Ready,
    /// Create, a GET rejected with 403, then delete.
    Forbidden,
    /// Create, a GET left unanswered while the token is cancelled, then delete.
    CancelledWhileWaiting(CancellationToken),
}

impl ApiServerVerifier {
    fn run(self, scenario: Scenario) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            match scenario {
                Scenario::Ready => {
                    self.expect_create()
                        .await
                        .expect_get(ready_mapping())
                        .await
                        .expect_delete()
                        .await;
                }
                Scenario::Forbidden => {
                    self.expect_create()
                        .await
                        .expect_get_forbidden()
                        .await
                        .expect_delete()
                        .await;
                }
                Scenario::CancelledWhileWaiting(cancel) => {
                    self.expect_create()
                        .await
                        .expect_get_then_cancel(cancel)
                        .await;
                }
            }
        })
    }

    async fn expect_create(mut self) -> Self {
        let (request, send) = self.0.next_request().await.expect("create not issued");
        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.uri().path(), COLLECTION);

        let bytes = request.into_body().collect_bytes().await.expect("body");
        let created: Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(created["metadata"]["name"], HOST);
        assert_eq!(created["spec"]["ref"]["name"], "hello");
        assert_eq!(
            created["metadata"]["annotations"]["kourier.knative.dev/disable-http2"],
            "true"
        );

        send.send_response(json_response(StatusCode::CREATED, &created));
        self
    }

    async fn expect_get(mut self, state: Value) -> Self {
        let (request, send) = self.0.next_request().await.expect("get not issued");
        assert_eq!(request.method(), Method::GET);
        assert_eq!(request.uri().path(), format!("{}/{}", COLLECTION, HOST));
        send.send_response(json_response(StatusCode::OK, &state));
        self
    }

    async fn expect_get_forbidden(mut self) -> Self {
        let (request, send) = self.0.next_request().await.expect("get not issued");
        assert_eq!(request.method(), Method::GET);
        send.send_response(json_response(
            StatusCode::FORBIDDEN,
            &status("Failure", 403, "Forbidden"),
        ));
        self
    }

    async fn expect_get_then_cancel(mut self, cancel: CancellationToken) {
        let (request, _pending) = self.0.next_request().await.expect("get not issued");
        assert_eq!(request.method(), Method::GET);
        cancel.cancel();
        // The GET stays unanswered; cleanup must still happen.
        self.expect_delete().await;
    }

    async fn expect_delete(mut self) -> Self {
        let (request, send) = self.0.next_request().await.expect("delete not issued");
        assert_eq!(request.method(), Method::DELETE);
        assert_eq!(request.uri().path(), format!("{}/{}", COLLECTION, HOST));
        send.send_response(json_response(
            StatusCode::OK,
            &status("Success", 200, ""),
        ));
        self
    }
}

fn testcontext() -> (Client, ApiServerVerifier) {
    let (mock_service, handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
    let client = Client::new(mock_service, "serving-tests");
    (client, ApiServerVerifier(handle))
}

fn json_response(code: StatusCode, value: &Value) -> Response<Body> {
    let bytes = serde_json::to_vec(value).expect("serialize");
    Response::builder()
        .status(code)
        .body(Body::from(bytes))
        .expect("response")
}

fn status(outcome: &str, code: u16, reason: &str) -> Value {
    json!({
        "kind": "Status",
        "apiVersion": "v1",
        "metadata": {},
        "status": outcome,
        "reason": reason,
        "code": code,
    })
}

fn ready_mapping() -> Value {
    json!({
        "apiVersion": "serving.knative.dev/v1beta1",
        "kind": "DomainMapping",
        "metadata": { "name": HOST, "namespace": "serving-tests", "generation": 1 },
        "spec": { "ref": { "apiVersion": "serving.knative.dev/v1", "kind": "Service", "name": "hello" } },
        "status": {
            "observedGeneration": 1,
            "conditions": [ { "type": "Ready", "status": "True" } ],
        },
    })
}

/// In-process stand-in for the ingress, answering like the test service.
async fn serve_ingress() -> SocketAddr {
    let app = Router::new().route("/", get(|| async { "wsserver" }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    addr
}

fn check_config(ingress: Option<SocketAddr>) -> CheckConfig {
    let mut config = CheckConfig::new("hello", "serving-tests");
    config.scheme = Scheme::Http;
    config.probe.ingress = ingress;
    config.probe.retry = RetryConfig::fixed(2, Duration::from_millis(20));
    config
}

async fn finished(server: tokio::task::JoinHandle<()>) {
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("timeout on mock apiserver")
        .expect("scenario succeeded");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ready_mapping_is_probed_then_deleted() {
    let ingress = serve_ingress().await;
    let (client, apiserver) = testcontext();
    let server = apiserver.run(Scenario::Ready);

    let report = DomainMappingCheck::new(client, check_config(Some(ingress)), CancellationToken::new())
        .run()
        .await
        .expect("check");

    assert_eq!(report.host, HOST);
    assert!(report.probe.success);
    assert_eq!(report.probe.last_body, b"wsserver");
    finished(server).await;
}

#[tokio::test]
async fn mapping_is_deleted_when_readiness_fails() {
    let (client, apiserver) = testcontext();
    let server = apiserver.run(Scenario::Forbidden);

    let err = DomainMappingCheck::new(client, check_config(None), CancellationToken::new())
        .run()
        .await
        .unwrap_err();

    match err {
        KubeError::Check(Error::Predicate { target, .. }) => assert_eq!(target, HOST),
        other => panic!("expected predicate error, got {}", other),
    }
    finished(server).await;
}

#[tokio::test]
async fn mapping_is_deleted_after_cancellation() {
    let (client, apiserver) = testcontext();
    let cancel = CancellationToken::new();
    let server = apiserver.run(Scenario::CancelledWhileWaiting(cancel.clone()));

    let err = DomainMappingCheck::new(client, check_config(None), cancel)
        .run()
        .await
        .unwrap_err();

    match err {
        KubeError::Check(e) => assert!(e.is_cancelled(), "got {}", e),
        other => panic!("expected cancellation, got {}", other),
    }
    finished(server).await;
}
