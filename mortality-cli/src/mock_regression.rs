//! Local stand-in for the regression service
//!
//! Answers `/` and `/cum` with a flat band: the baseline window mean with
//! bounds at two population standard deviations. Missing input points are
//! read and written as `NA`.

use anyhow::Result;
use mortality_core::regression::NOT_AVAILABLE;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};
use warp::Filter;

/// Query string shared by both endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct BandQuery {
    pub y: String,
    pub bs: usize,
    pub be: usize,
    #[serde(default)]
    pub s: Option<u8>,
    #[serde(default)]
    pub t: Option<u8>,
    #[serde(default)]
    pub m: Option<String>,
    #[serde(default)]
    pub xs: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BandResponse {
    pub y: Vec<Value>,
    pub lower: Vec<Value>,
    pub upper: Vec<Value>,
    pub zscore: Vec<Value>,
}

fn na_or(value: Option<f64>) -> Value {
    match value {
        Some(v) if v.is_finite() => Value::from(v),
        _ => Value::from(NOT_AVAILABLE),
    }
}

/// Parses a comma-joined series; anything that is not a number is missing.
pub fn parse_series(y: &str) -> Vec<Option<f64>> {
    y.split(',')
        .map(|v| v.trim().parse::<f64>().ok().filter(|x| x.is_finite()))
        .collect()
}

/// Computes the band for one request, or `None` when the window is unusable.
pub fn fit_band(query: &BandQuery, cumulative: bool) -> Option<BandResponse> {
    let series = parse_series(&query.y);
    if query.bs == 0 || query.bs > query.be || query.be > series.len() {
        return None;
    }

    let window: Vec<f64> = series[query.bs - 1..query.be].iter().flatten().copied().collect();
    if window.is_empty() {
        return None;
    }
    let n = window.len() as f64;
    let mean = window.iter().sum::<f64>() / n;
    let sd = (window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();

    let mut response = BandResponse {
        y: Vec::with_capacity(series.len()),
        lower: Vec::with_capacity(series.len()),
        upper: Vec::with_capacity(series.len()),
        zscore: Vec::with_capacity(series.len()),
    };

    for (i, observed) in series.iter().enumerate() {
        // Cumulative fits grow linearly with the band widening as sqrt(n)
        let (fitted, spread) = if cumulative {
            let steps = (i + 1) as f64;
            (mean * steps, 2.0 * sd * steps.sqrt())
        } else {
            (mean, 2.0 * sd)
        };
        response.y.push(na_or(Some(fitted)));
        response.lower.push(na_or(Some(fitted - spread)));
        response.upper.push(na_or(Some(fitted + spread)));
        response.zscore.push(na_or(
            (*observed)
                .filter(|_| sd > 0.0 && !cumulative)
                .map(|v| (v - mean) / sd),
        ));
    }

    Some(response)
}

pub struct MockRegressionServer {
    error_rate: f64,
}

impl MockRegressionServer {
    pub fn new(error_rate: f64) -> Self {
        Self {
            error_rate: error_rate.clamp(0.0, 1.0),
        }
    }

    pub fn process(
        &self,
        query: BandQuery,
        cumulative: bool,
    ) -> std::result::Result<BandResponse, warp::Rejection> {
        if self.error_rate > 0.0 && rand::random::<f64>() < self.error_rate {
            return Err(warp::reject::custom(SimulatedError));
        }

        debug!(
            points = query.y.split(',').count(),
            bs = query.bs,
            be = query.be,
            method = query.m.as_deref().unwrap_or("-"),
            cumulative,
            "Fitting band"
        );
        fit_band(&query, cumulative).ok_or_else(|| warp::reject::custom(InvalidWindow))
    }
}

fn routes(
    server: Arc<MockRegressionServer>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = Infallible> + Clone {
    let with_server = warp::any().map(move || server.clone());

    let general = warp::path::end()
        .and(warp::get())
        .and(warp::query::<BandQuery>())
        .and(with_server.clone())
        .and_then(|query: BandQuery, server: Arc<MockRegressionServer>| {
            handle_band(query, server, false)
        });

    let cumulative = warp::path("cum")
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::query::<BandQuery>())
        .and(with_server)
        .and_then(|query: BandQuery, server: Arc<MockRegressionServer>| {
            handle_band(query, server, true)
        });

    let health_route = warp::path("health")
        .and(warp::get())
        .map(|| warp::reply::with_status("OK", warp::http::StatusCode::OK));

    general
        .or(cumulative)
        .or(health_route)
        .recover(handle_rejection)
}

pub async fn start_mock_server(port: u16, error_rate: f64) -> Result<()> {
    info!(
        "Starting mock regression server on port {} (error rate {})",
        port, error_rate
    );
    let server = Arc::new(MockRegressionServer::new(error_rate));

    info!("Mock regression server ready at http://localhost:{}", port);
    warp::serve(routes(server)).run(([127, 0, 0, 1], port)).await;
    Ok(())
}

/// Binds the mock on an ephemeral local port; drive the returned future to serve.
pub fn bind_ephemeral(error_rate: f64) -> (SocketAddr, impl Future<Output = ()>) {
    let server = Arc::new(MockRegressionServer::new(error_rate));
    warp::serve(routes(server)).bind_ephemeral(([127, 0, 0, 1], 0))
}

async fn handle_band(
    query: BandQuery,
    server: Arc<MockRegressionServer>,
    cumulative: bool,
) -> std::result::Result<impl warp::Reply, warp::Rejection> {
    let response = server.process(query, cumulative)?;
    Ok(warp::reply::json(&response))
}

async fn handle_rejection(err: warp::Rejection) -> std::result::Result<impl warp::Reply, Infallible> {
    let (status, message) = if err.find::<SimulatedError>().is_some() {
        (
            warp::http::StatusCode::INTERNAL_SERVER_ERROR,
            "Simulated server error for testing",
        )
    } else if err.find::<InvalidWindow>().is_some() {
        (
            warp::http::StatusCode::BAD_REQUEST,
            "Baseline window has no usable values",
        )
    } else if err.is_not_found() {
        (warp::http::StatusCode::NOT_FOUND, "Not found")
    } else {
        (warp::http::StatusCode::BAD_REQUEST, "Invalid request")
    };

    let body = serde_json::json!({ "error": message });
    Ok(warp::reply::with_status(warp::reply::json(&body), status))
}

#[derive(Debug)]
struct SimulatedError;
impl warp::reject::Reject for SimulatedError {}

#[derive(Debug)]
struct InvalidWindow;
impl warp::reject::Reject for InvalidWindow {}
