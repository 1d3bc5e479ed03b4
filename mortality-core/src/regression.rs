//! Client for the external baseline regression service

use crate::config::ServiceConfig;
use crate::{MortalityError, Result};
use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::future::retry;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Missing-value marker used on the wire in both directions
pub const NOT_AVAILABLE: &str = "NA";

/// Baseline estimation method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineMethod {
    Naive,
    Mean,
    Median,
    LinReg,
    Exp,
    Auto,
}

impl BaselineMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            BaselineMethod::Naive => "naive",
            BaselineMethod::Mean => "mean",
            BaselineMethod::Median => "median",
            BaselineMethod::LinReg => "lin_reg",
            BaselineMethod::Exp => "exp",
            BaselineMethod::Auto => "auto",
        }
    }

    /// Trend-fitting methods send `t=1`.
    pub fn has_trend(self) -> bool {
        matches!(self, BaselineMethod::LinReg | BaselineMethod::Exp)
    }
}

impl fmt::Display for BaselineMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BaselineMethod {
    type Err = MortalityError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "naive" => Ok(BaselineMethod::Naive),
            "mean" => Ok(BaselineMethod::Mean),
            "median" => Ok(BaselineMethod::Median),
            "lin_reg" | "linreg" => Ok(BaselineMethod::LinReg),
            "exp" => Ok(BaselineMethod::Exp),
            "auto" => Ok(BaselineMethod::Auto),
            other => Err(MortalityError::UnknownVariant {
                kind: "baseline method",
                value: other.to_string(),
            }),
        }
    }
}

/// One call to the regression service, already trimmed to the window start
#[derive(Debug, Clone, PartialEq)]
pub struct BaselineRequest {
    pub series: Vec<Option<f64>>,
    /// 1-indexed, inclusive, relative to `series`
    pub baseline_start: usize,
    pub baseline_end: usize,
    pub method: BaselineMethod,
    pub seasonal_period: u8,
    pub trend: bool,
    pub cumulative: bool,
    pub alignment_hint: Option<String>,
}

impl BaselineRequest {
    /// Cumulative, non-seasonal requests go to the dedicated endpoint.
    pub fn uses_cumulative_endpoint(&self) -> bool {
        self.cumulative && self.seasonal_period == 1
    }

    /// Path and query pairs for this request.
    pub fn to_query(&self) -> (&'static str, Vec<(&'static str, String)>) {
        let y = self
            .series
            .iter()
            .map(|v| match v {
                Some(x) if !x.is_nan() => x.to_string(),
                _ => NOT_AVAILABLE.to_string(),
            })
            .collect::<Vec<_>>()
            .join(",");

        let mut query = vec![
            ("y", y),
            ("bs", self.baseline_start.to_string()),
            ("be", self.baseline_end.to_string()),
        ];

        let path = if self.uses_cumulative_endpoint() {
            query.push(("t", (self.trend as u8).to_string()));
            "/cum"
        } else {
            query.push(("s", self.seasonal_period.to_string()));
            query.push(("t", (self.trend as u8).to_string()));
            query.push(("m", self.method.as_str().to_string()));
            "/"
        };

        if let Some(ref hint) = self.alignment_hint {
            query.push(("xs", hint.clone()));
        }

        (path, query)
    }
}

/// Parsed service output, truncated to the request length
#[derive(Debug, Clone, PartialEq)]
pub struct BaselineResponse {
    pub fitted: Vec<Option<f64>>,
    pub lower: Vec<Option<f64>>,
    pub upper: Vec<Option<f64>>,
    pub zscore: Option<Vec<Option<f64>>>,
}

/// A numeric cell that may carry the `NA` sentinel
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireValue {
    Number(f64),
    Text(String),
    Null(()),
}

impl WireValue {
    fn into_option(self) -> Option<f64> {
        match self {
            WireValue::Number(v) if v.is_finite() => Some(v),
            WireValue::Number(_) | WireValue::Null(()) => None,
            WireValue::Text(s) if s == NOT_AVAILABLE => None,
            WireValue::Text(s) => s.parse::<f64>().ok().filter(|v| v.is_finite()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    y: Vec<WireValue>,
    lower: Vec<WireValue>,
    upper: Vec<WireValue>,
    #[serde(default)]
    zscore: Option<Vec<WireValue>>,
}

fn parse_column(values: Vec<WireValue>, len: usize) -> Vec<Option<f64>> {
    values
        .into_iter()
        .take(len)
        .map(WireValue::into_option)
        .collect()
}

impl BaselineResponse {
    /// Parses a response body; forecast points beyond `len` are dropped.
    pub fn from_json(body: &str, len: usize) -> Result<Self> {
        let wire: WireResponse = serde_json::from_str(body)?;
        Ok(Self {
            fitted: parse_column(wire.y, len),
            lower: parse_column(wire.lower, len),
            upper: parse_column(wire.upper, len),
            zscore: wire.zscore.map(|z| parse_column(z, len)),
        })
    }
}

/// The regression backend seen by the estimator
#[async_trait]
pub trait RegressionService: Send + Sync {
    async fn fit(&self, request: &BaselineRequest) -> Result<BaselineResponse>;
}

/// Fixed-delay backoff that gives up after a bounded number of retries
#[derive(Debug, Clone)]
pub struct FixedRetries {
    delay: Duration,
    max_retries: u32,
    remaining: u32,
}

impl FixedRetries {
    pub fn new(delay: Duration, max_retries: u32) -> Self {
        Self {
            delay,
            max_retries,
            remaining: max_retries,
        }
    }
}

impl Backoff for FixedRetries {
    fn reset(&mut self) {
        self.remaining = self.max_retries;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(self.delay)
    }
}

/// HTTP client for the regression service
#[derive(Clone)]
pub struct StatsClient {
    client: Client,
    config: ServiceConfig,
}

impl StatsClient {
    pub fn new(config: ServiceConfig) -> Result<Self> {
        let client = Client::builder().gzip(true).build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Single attempt; the configured timeout bounds the whole exchange.
    async fn call_once(&self, request: &BaselineRequest) -> Result<BaselineResponse> {
        tokio::time::timeout(self.config.timeout(), self.exchange(request)).await?
    }

    async fn exchange(&self, request: &BaselineRequest) -> Result<BaselineResponse> {
        let (path, query) = request.to_query();
        let url = format!("{}{}", self.config.endpoint.trim_end_matches('/'), path);
        debug!(%url, points = request.series.len(), "Calling regression service");

        let response = self.client.get(&url).query(&query).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(MortalityError::ServiceStatus {
                status: status.as_u16(),
                body,
            });
        }
        BaselineResponse::from_json(&body, request.series.len())
    }
}

#[async_trait]
impl RegressionService for StatsClient {
    async fn fit(&self, request: &BaselineRequest) -> Result<BaselineResponse> {
        let policy = FixedRetries::new(self.config.retry_delay(), self.config.max_retries);

        retry(policy, || async {
            self.call_once(request).await.map_err(|e| {
                if e.is_timeout() {
                    backoff::Error::permanent(MortalityError::Timeout)
                } else if e.is_retryable() {
                    warn!("Regression call failed, will retry if attempts remain: {}", e);
                    backoff::Error::transient(e)
                } else {
                    warn!("Regression call rejected: {}", e);
                    backoff::Error::permanent(e)
                }
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(cumulative: bool, seasonal_period: u8) -> BaselineRequest {
        BaselineRequest {
            series: vec![Some(1.0), None, Some(2.5)],
            baseline_start: 1,
            baseline_end: 3,
            method: BaselineMethod::LinReg,
            seasonal_period,
            trend: true,
            cumulative,
            alignment_hint: Some("2015".to_string()),
        }
    }

    #[test]
    fn test_general_query() {
        let (path, query) = request(false, 3).to_query();
        assert_eq!(path, "/");
        assert!(query.contains(&("y", "1,NA,2.5".to_string())));
        assert!(query.contains(&("s", "3".to_string())));
        assert!(query.contains(&("t", "1".to_string())));
        assert!(query.contains(&("m", "lin_reg".to_string())));
        assert!(query.contains(&("xs", "2015".to_string())));
    }

    #[test]
    fn test_cumulative_query() {
        let (path, query) = request(true, 1).to_query();
        assert_eq!(path, "/cum");
        assert!(!query.iter().any(|(k, _)| *k == "m" || *k == "s"));

        // Seasonal cumulative data stays on the general endpoint
        let (path, _) = request(true, 4).to_query();
        assert_eq!(path, "/");
    }

    #[test]
    fn test_response_parsing_truncates_and_maps_sentinel() {
        let body = r#"{"y":[1,"NA",3,4,5],"lower":[0,null,2,3,4],"upper":[2,"NA",4,5,6]}"#;
        let parsed = BaselineResponse::from_json(body, 3).unwrap();
        assert_eq!(parsed.fitted, vec![Some(1.0), None, Some(3.0)]);
        assert_eq!(parsed.lower, vec![Some(0.0), None, Some(2.0)]);
        assert_eq!(parsed.upper, vec![Some(2.0), None, Some(4.0)]);
        assert!(parsed.zscore.is_none());
    }

    #[test]
    fn test_fixed_retries_are_bounded() {
        let mut policy = FixedRetries::new(Duration::from_millis(5), 2);
        assert_eq!(policy.next_backoff(), Some(Duration::from_millis(5)));
        assert_eq!(policy.next_backoff(), Some(Duration::from_millis(5)));
        assert_eq!(policy.next_backoff(), None);
        policy.reset();
        assert!(policy.next_backoff().is_some());
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("lin_reg".parse::<BaselineMethod>().unwrap(), BaselineMethod::LinReg);
        assert!(BaselineMethod::Exp.has_trend());
        assert!(!BaselineMethod::Mean.has_trend());
        assert!("spline".parse::<BaselineMethod>().is_err());
    }
}
