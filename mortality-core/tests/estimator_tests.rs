use mockito::Matcher;
use mortality_core::config::{EstimatorConfig, ServiceConfig};
use mortality_core::{
    BaselineEstimator, BaselineMethod, BaselineParams, BaselineSource, Estimate, Granularity, Label,
    MortalityError, RegressionService, Series, SkipReason, StatsClient,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

fn service_config(endpoint: String) -> ServiceConfig {
    ServiceConfig {
        endpoint,
        timeout_ms: 2_000,
        max_retries: 2,
        retry_delay_ms: 10,
    }
}

fn estimator(endpoint: String) -> BaselineEstimator {
    let client = StatsClient::new(service_config(endpoint)).unwrap();
    BaselineEstimator::new(Arc::new(client), EstimatorConfig::default())
}

fn yearly(len: usize) -> Vec<Label> {
    (0..len).map(|i| (2000 + i).to_string()).collect()
}

fn params(start: usize, end: usize) -> BaselineParams {
    BaselineParams {
        window_start: start,
        window_end: end,
        method: BaselineMethod::Mean,
        granularity: Granularity::Yearly,
        cumulative: false,
    }
}

fn computed(estimate: Estimate) -> mortality_core::BaselineResult {
    match estimate {
        Estimate::Computed(result) => result,
        Estimate::Skipped(reason) => panic!("unexpected skip: {}", reason),
    }
}

#[tokio::test]
async fn test_remote_result_is_padded_and_truncated() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("bs".into(), "1".into()),
            Matcher::UrlEncoded("be".into(), "5".into()),
            Matcher::UrlEncoded("s".into(), "1".into()),
            Matcher::UrlEncoded("t".into(), "0".into()),
            Matcher::UrlEncoded("m".into(), "mean".into()),
            Matcher::UrlEncoded("xs".into(), "2002".into()),
            Matcher::UrlEncoded("y".into(), "2,NA,4,5,6,7,8,9".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        // Ten fitted points for an eight point request: two forecast points
        .with_body(
            r#"{"y":[5,5,5,5,5,5,5,5,6,6],
                "lower":[4,4,4,4,4,"NA",4,4,5,5],
                "upper":[6,6,6,6,6,6,6,6,7,7],
                "zscore":[-1,null,-0.5,0,0.5,1,1.5,2,0,0]}"#,
        )
        .expect(1)
        .create_async()
        .await;

    let observed: Series = (0..10)
        .map(|i| if i == 3 { None } else { Some(i as f64) })
        .collect();
    let result = computed(
        estimator(server.url())
            .estimate(&observed, &yearly(10), &params(2, 6))
            .await,
    );

    mock.assert_async().await;
    assert_eq!(result.source, BaselineSource::Remote);
    assert_eq!(result.baseline.len(), 10);
    assert_eq!(result.baseline[..2], [None, None]);
    assert!(result.baseline[2..].iter().all(|v| *v == Some(5.0)));
    assert_eq!(result.lower[7], None);
    let zscore = result.zscore.unwrap();
    assert_eq!(zscore.len(), 10);
    assert_eq!(zscore[3], None);
    assert_eq!(zscore[9], Some(2.0));
}

#[tokio::test]
async fn test_cumulative_yearly_uses_cum_endpoint() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/cum")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"y":[1,2,3,4],"lower":[0,1,2,3],"upper":[2,3,4,5]}"#)
        .expect(1)
        .create_async()
        .await;

    let observed: Series = vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0)];
    let params = BaselineParams {
        cumulative: true,
        method: BaselineMethod::LinReg,
        ..params(0, 2)
    };
    let result = computed(
        estimator(server.url())
            .estimate(&observed, &yearly(4), &params)
            .await,
    );

    mock.assert_async().await;
    assert_eq!(result.baseline, vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0)]);
    assert!(result.zscore.is_none());
}

#[tokio::test]
async fn test_server_errors_are_retried_then_fall_back() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/")
        .match_query(Matcher::Any)
        .with_status(500)
        .with_body("internal error")
        .expect(3)
        .create_async()
        .await;

    let observed: Series = vec![Some(10.0); 30];
    let result = computed(
        estimator(server.url())
            .estimate(&observed, &yearly(30), &params(0, 25))
            .await,
    );

    mock.assert_async().await;
    assert_eq!(result.source, BaselineSource::Fallback);
    assert_eq!(result.baseline, vec![Some(10.0); 30]);
    assert_eq!(result.lower, vec![Some(10.0); 30]);
    assert_eq!(result.upper, vec![Some(10.0); 30]);
    assert!(result.zscore.unwrap().iter().all(Option::is_none));
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/")
        .match_query(Matcher::Any)
        .with_status(400)
        .with_body("bad window")
        .expect(1)
        .create_async()
        .await;

    let observed: Series = (0..12).map(|i| Some(100.0 + i as f64)).collect();
    let result = computed(
        estimator(server.url())
            .estimate(&observed, &yearly(12), &params(0, 9))
            .await,
    );

    mock.assert_async().await;
    assert_eq!(result.source, BaselineSource::Fallback);
}

#[tokio::test]
async fn test_client_error_status_is_reported() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/")
        .match_query(Matcher::Any)
        .with_status(422)
        .with_body("unprocessable")
        .create_async()
        .await;

    let client = StatsClient::new(service_config(server.url())).unwrap();
    let request = mortality_core::estimator::build_request(
        &[Some(1.0), Some(2.0), Some(3.0)],
        &yearly(3),
        &params(0, 2),
    );
    match client.fit(&request).await {
        Err(MortalityError::ServiceStatus { status, body }) => {
            assert_eq!(status, 422);
            assert_eq!(body, "unprocessable");
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn test_stalled_body_is_bounded_by_one_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            tokio::time::sleep(Duration::from_millis(350)).await;
            // Headers promise a body that never arrives
            let _ = socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 100\r\n\r\n",
                )
                .await;
            held.push(socket);
        }
    });

    let client = StatsClient::new(ServiceConfig {
        timeout_ms: 400,
        ..service_config(format!("http://{}", addr))
    })
    .unwrap();
    let request = mortality_core::estimator::build_request(
        &[Some(1.0), Some(2.0), Some(3.0)],
        &yearly(3),
        &params(0, 2),
    );

    let started = Instant::now();
    let err = client.fit(&request).await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(err.is_timeout());
    assert!(elapsed < Duration::from_millis(650), "took {:?}", elapsed);
}

#[tokio::test]
async fn test_timeout_is_not_retried() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));

    let counter = accepted.clone();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            // Never answer
            held.push(socket);
        }
    });

    let config = ServiceConfig {
        timeout_ms: 200,
        ..service_config(format!("http://{}", addr))
    };
    let client = StatsClient::new(config).unwrap();
    let estimator = BaselineEstimator::new(Arc::new(client), EstimatorConfig::default());

    let observed: Series = (0..12).map(|i| Some(100.0 + i as f64)).collect();
    let result = computed(estimator.estimate(&observed, &yearly(12), &params(0, 9)).await);

    assert_eq!(result.source, BaselineSource::Fallback);
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_timeout_error_classification() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let client = StatsClient::new(ServiceConfig {
        timeout_ms: 100,
        ..service_config(format!("http://{}", addr))
    })
    .unwrap();

    let request = mortality_core::estimator::build_request(
        &[Some(1.0), Some(2.0), Some(3.0)],
        &yearly(3),
        &params(0, 2),
    );
    let err = client.fit(&request).await.unwrap_err();
    assert!(err.is_timeout());
}

#[tokio::test]
async fn test_window_above_cap_uses_fallback_without_calling() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    // 35 yearly points, above the 30 point cap: seven cycles of 0..=4
    let observed: Series = (0..40).map(|i| Some((i % 5) as f64)).collect();
    let result = computed(
        estimator(server.url())
            .estimate(&observed, &yearly(40), &params(0, 34))
            .await,
    );

    mock.assert_async().await;
    assert_eq!(result.source, BaselineSource::Fallback);
    assert_eq!(result.baseline, vec![Some(2.0); 40]);

    let sd = 2.0_f64.sqrt();
    for (lower, upper) in result.lower.iter().zip(&result.upper) {
        assert!((lower.unwrap() - (2.0 - 2.0 * sd)).abs() < 1e-9);
        assert!((upper.unwrap() - (2.0 + 2.0 * sd)).abs() < 1e-9);
    }
}

#[tokio::test]
async fn test_unusable_windows_are_skipped() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", Matcher::Any)
        .expect(0)
        .create_async()
        .await;
    let estimator = estimator(server.url());
    let timeline = yearly(6);

    let sparse = vec![Some(1.0), None, Some(2.0), None, None, Some(9.0)];
    assert_eq!(
        estimator.estimate(&sparse, &timeline, &params(0, 4)).await,
        Estimate::Skipped(SkipReason::InsufficientData {
            valid: 2,
            required: 3
        })
    );

    let empty = vec![None, None, None, None, Some(4.0), Some(5.0)];
    assert_eq!(
        estimator.estimate(&empty, &timeline, &params(0, 3)).await,
        Estimate::Skipped(SkipReason::EmptyWindow)
    );

    let full = vec![Some(1.0); 6];
    assert!(matches!(
        estimator.estimate(&full, &timeline, &params(3, 6)).await,
        Estimate::Skipped(SkipReason::InvalidWindow { .. })
    ));
    assert!(matches!(
        estimator.estimate(&full, &timeline, &params(4, 2)).await,
        Estimate::Skipped(SkipReason::InvalidWindow { .. })
    ));

    let auto = BaselineParams {
        method: BaselineMethod::Auto,
        ..params(0, 4)
    };
    assert_eq!(
        estimator.estimate(&full, &timeline, &auto).await,
        Estimate::Skipped(SkipReason::AutoMethod)
    );

    mock.assert_async().await;
}
