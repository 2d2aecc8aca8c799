//! Behavior tests for the retrying provider client.
//!
//! Upstreams are replaced by `ScriptedHttpClient`, which records the virtual
//! instant of every physical request.

use std::io::{Cursor, Write};
use std::sync::Arc;
use std::time::Duration;

use finmerge_core::{
    BatchExecutor, CircuitBreaker, Credentials, FailureClass, FetchConfig, FetchRuntime,
    FetchTask, HttpError, HttpResponse, Operation, ProviderEndpoint, ProviderId, RateLimiter,
    ResilientClient, ScriptedHttpClient, Symbol,
};
use tokio::time::Instant;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

const KIS_OK: &str = r#"{"rt_cd":"0","msg_cd":"MCA00000","msg1":"정상처리",
"output":{"stck_prpr":"71000","per":"12.3"}}"#;

fn kis_client(http: &Arc<ScriptedHttpClient>, capacity: u32) -> ResilientClient {
    ResilientClient::new(
        Arc::clone(http) as Arc<dyn finmerge_core::HttpClient>,
        ProviderEndpoint::kis("https://kis.test", "token", "app-key", "app-secret"),
        Arc::new(RateLimiter::per_second(capacity)),
        Arc::new(CircuitBreaker::default()),
    )
}

fn quote() -> Operation {
    Operation::kis_quote(&Symbol::parse("005930").expect("valid listing code"))
}

fn gaps(http: &ScriptedHttpClient) -> Vec<Duration> {
    http.requests()
        .windows(2)
        .map(|pair| pair[1].at.duration_since(pair[0].at))
        .collect()
}

// =============================================================================
// Retry budget
// =============================================================================

#[tokio::test(start_paused = true)]
async fn timeouts_are_retried_exactly_max_retries_times() {
    for max_retries in [2, 0] {
        // Given: An upstream that always times out
        let http = Arc::new(ScriptedHttpClient::always(Err(HttpError::timeout("read timed out"))));
        let client = kis_client(&http, 8);

        // When: A request is sent with the given retry budget
        let failure = client
            .send(&quote(), max_retries)
            .await
            .expect_err("upstream never answers");

        // Then: max_retries + 1 physical attempts were made
        assert_eq!(http.request_count(), max_retries as usize + 1);
        assert_eq!(failure.class(), FailureClass::Timeout);
        assert_eq!(failure.attempts(), max_retries + 1);
        assert!(failure.retryable());
    }
}

#[tokio::test(start_paused = true)]
async fn every_retry_takes_its_own_rate_limit_slot() {
    // Given: A limiter with one slot per second and a flaky connection
    let http = Arc::new(ScriptedHttpClient::new([
        Err(HttpError::connect("connection reset")),
        Err(HttpError::connect("connection reset")),
        Ok(HttpResponse::ok_json(KIS_OK)),
    ]));
    let client = kis_client(&http, 1);

    // When: The request eventually succeeds
    client.send(&quote(), 3).await.expect("third attempt succeeds");

    // Then: Retries waited for the limiter, not just the short transient backoff
    assert_eq!(http.request_count(), 3);
    for gap in gaps(&http) {
        assert!(gap >= Duration::from_secs(1), "gap {gap:?} bypassed the limiter");
    }
    assert_eq!(client.limiter().in_window(), 1);
}

#[tokio::test(start_paused = true)]
async fn transient_backoff_starts_near_300ms() {
    // Given: One timeout followed by a success, with ample limiter capacity
    let http = Arc::new(ScriptedHttpClient::new([
        Err(HttpError::timeout("timed out")),
        Ok(HttpResponse::ok_json(KIS_OK)),
    ]));
    let client = kis_client(&http, 8);

    // When: The request is sent
    client.send(&quote(), 3).await.expect("retry succeeds");

    // Then: The retry waited 0.3s plus at most 0.2s of jitter
    let gap = gaps(&http)[0];
    assert!(gap >= Duration::from_millis(300), "gap={gap:?}");
    assert!(gap <= Duration::from_millis(500), "gap={gap:?}");
}

// =============================================================================
// Ban avoidance
// =============================================================================

#[tokio::test(start_paused = true)]
async fn two_consecutive_server_errors_force_a_sixty_second_cooldown() {
    // Given: An upstream that is busy twice, then recovers
    let http = Arc::new(ScriptedHttpClient::new([
        Ok(HttpResponse::new(503, "busy")),
        Ok(HttpResponse::new(503, "busy")),
        Ok(HttpResponse::ok_json(KIS_OK)),
    ]));
    let client = kis_client(&http, 8);

    // When: The request is sent with enough budget to recover
    client.send(&quote(), 3).await.expect("third attempt succeeds");

    // Then: The first retry used the 5s overload backoff
    let gaps = gaps(&http);
    assert_eq!(gaps[0], Duration::from_secs(5));

    // And: The second failure escalated to a wait of at least 60s
    assert!(gaps[1] >= Duration::from_secs(60), "gap={:?}", gaps[1]);

    // And: The failure counter was reset
    assert_eq!(client.breaker().consecutive_failures(), 0);
}

#[tokio::test(start_paused = true)]
async fn retry_after_overrides_the_overload_backoff() {
    // Given: A 429 carrying a two-second Retry-After hint
    let http = Arc::new(ScriptedHttpClient::new([
        Ok(HttpResponse::new(429, "").with_header("Retry-After", "2")),
        Ok(HttpResponse::ok_json(KIS_OK)),
    ]));
    let client = kis_client(&http, 8);

    // When: The request is sent
    client.send(&quote(), 3).await.expect("retry succeeds");

    // Then: The retry waited for the hint instead of the 5s default
    let gap = gaps(&http)[0];
    assert!(gap >= Duration::from_secs(2), "gap={gap:?}");
    assert!(gap < Duration::from_secs(5), "gap={gap:?}");
}

#[tokio::test(start_paused = true)]
async fn tps_exceeded_body_is_treated_as_quota_overload() {
    // Given: The brokerage's "TPS exceeded" error delivered with a 500
    let http = Arc::new(ScriptedHttpClient::new([
        Ok(HttpResponse::new(
            500,
            r#"{"rt_cd":"1","msg_cd":"EGW00201","msg1":"초당 거래건수를 초과하였습니다."}"#,
        )),
        Ok(HttpResponse::ok_json(KIS_OK)),
    ]));
    let client = kis_client(&http, 8);

    // When: The budget is zero
    let failure = client.send(&quote(), 0).await.expect_err("no retries allowed");

    // Then: It is reported as a quota response and counted by the breaker
    assert_eq!(failure.class(), FailureClass::Http429);
    assert_eq!(http.request_count(), 1);
    assert_eq!(client.breaker().consecutive_failures(), 1);
}

#[tokio::test(start_paused = true)]
async fn a_cooldown_triggered_by_one_client_delays_its_siblings() {
    // Given: Two clients for the same provider from one runtime
    let http = Arc::new(ScriptedHttpClient::new([
        Ok(HttpResponse::new(503, "busy")),
        Ok(HttpResponse::new(502, "bad gateway")),
        Ok(HttpResponse::ok_json(KIS_OK)),
    ]));
    let runtime = FetchRuntime::new(
        &FetchConfig::default(),
        &Credentials::default().with_kis("app-key", "app-secret", "token"),
        Arc::clone(&http) as Arc<dyn finmerge_core::HttpClient>,
    );
    let first = runtime.client(ProviderId::Kis).expect("kis configured");
    let second = runtime.client(ProviderId::Kis).expect("kis configured");
    let start = Instant::now();

    // When: The first client hits two server errors without retrying
    first.send(&quote(), 0).await.expect_err("busy");
    first.send(&quote(), 0).await.expect_err("bad gateway");

    // Then: The second client waits out the shared cooldown before its request
    second.send(&quote(), 0).await.expect("upstream recovered");
    let last = http.requests().last().map(|r| r.at).expect("three requests");
    assert!(last.duration_since(start) >= Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn callers_queued_in_the_limiter_respect_a_cooldown_started_meanwhile() {
    // Given: A one-request-per-second credential and three batch tasks without retries
    let config = FetchConfig::from_toml_str("[kis]\nmax_requests_per_second = 1\n")
        .expect("valid config");
    let http = Arc::new(ScriptedHttpClient::new([
        Ok(HttpResponse::new(503, "busy")),
        Ok(HttpResponse::new(503, "busy")),
        Ok(HttpResponse::ok_json(KIS_OK)),
    ]));
    let runtime = FetchRuntime::new(
        &config,
        &Credentials::default().with_kis("app-key", "app-secret", "token"),
        Arc::clone(&http) as Arc<dyn finmerge_core::HttpClient>,
    );
    let tasks = ["005930", "000660", "035420"]
        .into_iter()
        .map(|code| {
            let symbol = Symbol::parse(code).expect("valid listing code");
            let operation = Operation::kis_quote(&symbol);
            FetchTask::new(symbol, operation, 0)
        })
        .collect();

    // When: The tasks run concurrently and the second response escalates
    let outcomes = runtime.fetch_all(&BatchExecutor::new(4), tasks).await;

    // Then: The task that was already waiting for a slot held off until the cooldown ended
    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes.iter().filter(|o| o.is_success()).count(), 1);
    let requests = http.requests();
    assert_eq!(requests.len(), 3);
    let gap = requests[2].at.duration_since(requests[1].at);
    assert!(gap >= Duration::from_secs(60), "third request sent {gap:?} after escalation");
}

// =============================================================================
// Non-retryable failures
// =============================================================================

#[tokio::test(start_paused = true)]
async fn malformed_and_semantic_failures_make_exactly_one_attempt() {
    let cases = [
        (HttpResponse::ok_json("<html>maintenance</html>"), FailureClass::MalformedBody),
        (
            HttpResponse::ok_json(r#"{"rt_cd":"7","msg_cd":"OPSQ0002","msg1":"없는 종목"}"#),
            FailureClass::SemanticError,
        ),
        (HttpResponse::ok_json(r#"{"rt_cd":"0"}"#), FailureClass::SemanticError),
    ];

    for (response, expected) in cases {
        // Given: A response that can never succeed on retry
        let http = Arc::new(ScriptedHttpClient::always(Ok(response)));
        let client = kis_client(&http, 8);

        // When: The request is sent with a generous budget
        let failure = client.send(&quote(), 5).await.expect_err("terminal failure");

        // Then: Only one physical attempt was made
        assert_eq!(failure.class(), expected);
        assert_eq!(http.request_count(), 1);
        assert!(!failure.retryable());
    }
}

#[tokio::test(start_paused = true)]
async fn disclosure_no_data_status_is_a_semantic_failure() {
    // Given: The disclosure API reporting "no data" inside a 200
    let http = Arc::new(ScriptedHttpClient::always(Ok(HttpResponse::ok_json(
        r#"{"status":"013","message":"조회된 데이타가 없습니다."}"#,
    ))));
    let client = ResilientClient::new(
        Arc::clone(&http) as Arc<dyn finmerge_core::HttpClient>,
        ProviderEndpoint::dart("https://dart.test", "dart-key"),
        Arc::new(RateLimiter::per_second(5)),
        Arc::new(CircuitBreaker::default()),
    );
    let corp = Symbol::parse("00126380").expect("valid corp code");

    // When: Statements are requested
    let failure = client
        .send(&Operation::dart_single_account(&corp, 2023, "11011"), 3)
        .await
        .expect_err("no data");

    // Then: The failure is semantic and the key never appears in it
    assert_eq!(failure.class(), FailureClass::SemanticError);
    assert_eq!(http.request_count(), 1);
    assert!(!failure.to_string().contains("dart-key"));
}

// =============================================================================
// Payload formats and quotas
// =============================================================================

#[tokio::test(start_paused = true)]
async fn corp_code_download_yields_the_xml_document() {
    // Given: A ZIP archive holding the corporate-code registry
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file("CORPCODE.xml", SimpleFileOptions::default())
        .expect("start entry");
    writer
        .write_all(
            concat!(
                "<result><list><corp_code>00126380</corp_code>",
                "<stock_code>005930</stock_code></list></result>",
            )
            .as_bytes(),
        )
        .expect("write entry");
    let archive = writer.finish().expect("finish archive").into_inner();

    let runtime = FetchRuntime::new(
        &FetchConfig::default(),
        &Credentials::default().with_dart("dart-key"),
        Arc::new(ScriptedHttpClient::always(Ok(HttpResponse::new(200, archive)))),
    );
    let client = runtime.client(ProviderId::Dart).expect("dart configured");

    // When: The registry is downloaded
    let payload = client
        .send(&Operation::dart_corp_codes(), 1)
        .await
        .expect("archive decodes");

    // Then: The XML document is returned as text
    let document = payload.as_xml().expect("xml payload");
    assert!(document.contains("<stock_code>005930</stock_code>"));
}

#[tokio::test(start_paused = true)]
async fn an_exhausted_daily_quota_stops_requests_instead_of_waiting() {
    // Given: A disclosure runtime with a daily allowance of two requests
    let config = FetchConfig::from_toml_str("[dart]\ndaily_quota = 2\n").expect("valid config");
    let http = Arc::new(ScriptedHttpClient::always(Ok(HttpResponse::ok_json(
        r#"{"status":"000","list":[]}"#,
    ))));
    let runtime = FetchRuntime::new(
        &config,
        &Credentials::default().with_dart("dart-key"),
        Arc::clone(&http) as Arc<dyn finmerge_core::HttpClient>,
    );
    let client = runtime.client(ProviderId::Dart).expect("dart configured");
    let corp = Symbol::parse("00126380").expect("valid corp code");
    let operation = Operation::dart_single_account(&corp, 2023, "11011");

    // When: Three requests are made
    client.send(&operation, 3).await.expect("first within quota");
    client.send(&operation, 3).await.expect("second within quota");
    let failure = client.send(&operation, 3).await.expect_err("quota spent");

    // Then: The third is refused without touching the network
    assert_eq!(failure.class(), FailureClass::QuotaExhausted);
    assert_eq!(failure.attempts(), 0);
    assert_eq!(http.request_count(), 2);
    assert!(failure.message().contains("try again"));
}

#[tokio::test(start_paused = true)]
async fn fetch_tags_the_outcome_with_its_task() {
    // Given: A task for one listing code
    let http = Arc::new(ScriptedHttpClient::always(Ok(HttpResponse::ok_json(KIS_OK))));
    let client = kis_client(&http, 8);
    let symbol = Symbol::parse("005930").expect("valid");
    let task = finmerge_core::FetchTask::new(symbol.clone(), Operation::kis_quote(&symbol), 2);

    // When: It is fetched
    let outcome = client.fetch(&task).await;

    // Then: The outcome carries the task and the decoded payload
    assert_eq!(outcome.task, task);
    let json = outcome.result.expect("success").into_json().expect("json payload");
    assert_eq!(json["output"]["per"], "12.3");
}
