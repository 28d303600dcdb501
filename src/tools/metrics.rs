//! Portfolio metric calculators
//!
//! Pure functions over periodic return series. Invalid input is reported as
//! `OrchestrationError::Validation`, never as NaN or infinity.

use crate::error::OrchestrationError;
use crate::models::ToolCallRequest;
use crate::tools::{number_series, optional_f64, Tool, ToolCategory};
use crate::Result;
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;

/// Up/down capture. A side is `None` when the benchmark never moved that way.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CaptureRatios {
    pub up_capture: Option<f64>,
    pub down_capture: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Scalar(f64),
    Capture(CaptureRatios),
}

impl MetricValue {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            MetricValue::Scalar(v) => Some(*v),
            MetricValue::Capture(_) => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            MetricValue::Scalar(v) => json!(v),
            MetricValue::Capture(c) => json!({
                "up_capture": c.up_capture,
                "down_capture": c.down_capture,
            }),
        }
    }
}

//
// ================= Calculators =================
//

/// Mean excess return over its sample standard deviation.
pub fn sharpe_ratio(returns: &[f64], risk_free_rate: f64) -> Result<f64> {
    ensure_finite("returns", returns)?;
    if !risk_free_rate.is_finite() {
        return Err(OrchestrationError::Validation(
            "risk_free_rate must be finite".to_string(),
        ));
    }
    if returns.len() < 2 {
        return Err(OrchestrationError::Validation(
            "sharpe_ratio needs at least two returns".to_string(),
        ));
    }

    let excess: Vec<f64> = returns.iter().map(|r| r - risk_free_rate).collect();
    let std = sample_std(&excess);
    if std <= f64::EPSILON {
        return Err(OrchestrationError::Validation(
            "sharpe_ratio is undefined for zero volatility".to_string(),
        ));
    }

    finite_result("sharpe_ratio", mean(&excess) / std)
}

/// Fraction of periods in which the portfolio beat the benchmark.
pub fn batting_average(port: &[f64], bench: &[f64]) -> Result<f64> {
    ensure_pair("batting_average", port, bench)?;
    if port.is_empty() {
        return Err(OrchestrationError::Validation(
            "batting_average needs at least one period".to_string(),
        ));
    }

    let wins = port.iter().zip(bench).filter(|(p, b)| p > b).count();
    Ok(wins as f64 / port.len() as f64)
}

pub fn up_capture(port: &[f64], bench: &[f64]) -> Result<Option<f64>> {
    ensure_pair("up_capture", port, bench)?;
    Ok(capture_side(port, bench, |b| b > 0.0))
}

pub fn down_capture(port: &[f64], bench: &[f64]) -> Result<Option<f64>> {
    ensure_pair("down_capture", port, bench)?;
    Ok(capture_side(port, bench, |b| b < 0.0))
}

pub fn capture_ratios(port: &[f64], bench: &[f64]) -> Result<CaptureRatios> {
    Ok(CaptureRatios {
        up_capture: up_capture(port, bench)?,
        down_capture: down_capture(port, bench)?,
    })
}

/// Sample standard deviation of active returns.
pub fn tracking_error(port: &[f64], bench: &[f64]) -> Result<f64> {
    ensure_pair("tracking_error", port, bench)?;
    if port.len() < 2 {
        return Err(OrchestrationError::Validation(
            "tracking_error needs at least two periods".to_string(),
        ));
    }

    let active: Vec<f64> = port.iter().zip(bench).map(|(p, b)| p - b).collect();
    finite_result("tracking_error", sample_std(&active))
}

/// Largest peak-to-trough decline of compounded wealth, as a non-positive fraction.
pub fn max_drawdown(returns: &[f64]) -> Result<f64> {
    ensure_finite("returns", returns)?;
    if returns.is_empty() {
        return Err(OrchestrationError::Validation(
            "max_drawdown needs at least one return".to_string(),
        ));
    }
    if returns.iter().any(|r| *r < -1.0) {
        return Err(OrchestrationError::Validation(
            "returns below -100% are not meaningful".to_string(),
        ));
    }

    let mut wealth = 1.0;
    let mut peak = f64::NEG_INFINITY;
    let mut worst = 0.0_f64;

    for r in returns {
        wealth *= 1.0 + r;
        peak = peak.max(wealth);
        // wealth wiped out before any positive peak
        let drawdown = if peak > 0.0 { (wealth - peak) / peak } else { -1.0 };
        worst = worst.min(drawdown);
    }

    Ok(worst)
}

fn capture_side<F>(port: &[f64], bench: &[f64], selects: F) -> Option<f64>
where
    F: Fn(f64) -> bool,
{
    let (p_sum, b_sum, n) = port
        .iter()
        .zip(bench)
        .filter(|(_, b)| selects(**b))
        .fold((0.0, 0.0, 0usize), |(ps, bs, n), (p, b)| (ps + p, bs + b, n + 1));

    if n == 0 || b_sum == 0.0 {
        None
    } else {
        Some(p_sum / b_sum)
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn sample_std(values: &[f64]) -> f64 {
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

fn ensure_finite(label: &str, series: &[f64]) -> Result<()> {
    if series.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(OrchestrationError::Validation(format!(
            "{} contains non-finite values",
            label
        )))
    }
}

fn ensure_pair(metric: &str, port: &[f64], bench: &[f64]) -> Result<()> {
    ensure_finite("port", port)?;
    ensure_finite("bench", bench)?;
    if port.len() != bench.len() {
        return Err(OrchestrationError::Validation(format!(
            "{}: port has {} periods but bench has {}",
            metric,
            port.len(),
            bench.len()
        )));
    }
    Ok(())
}

fn finite_result(metric: &str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(OrchestrationError::Validation(format!(
            "{} produced a non-finite result",
            metric
        )))
    }
}

//
// ================= Dispatch by name =================
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    SharpeRatio,
    BattingAverage,
    CaptureRatios,
    TrackingError,
    MaxDrawdown,
}

impl MetricKind {
    pub const ALL: [MetricKind; 5] = [
        MetricKind::SharpeRatio,
        MetricKind::BattingAverage,
        MetricKind::CaptureRatios,
        MetricKind::TrackingError,
        MetricKind::MaxDrawdown,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            MetricKind::SharpeRatio => "sharpe_ratio",
            MetricKind::BattingAverage => "batting_average",
            MetricKind::CaptureRatios => "capture_ratios",
            MetricKind::TrackingError => "tracking_error",
            MetricKind::MaxDrawdown => "max_drawdown",
        }
    }

    /// Number of return series the metric consumes.
    pub fn arity(&self) -> usize {
        match self {
            MetricKind::SharpeRatio | MetricKind::MaxDrawdown => 1,
            _ => 2,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for MetricKind {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self> {
        MetricKind::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| OrchestrationError::UnknownTool(s.to_string()))
    }
}

/// Compute a metric by name. `series` holds the returns (one series) or the
/// portfolio and benchmark (two series); `risk_free_rate` only affects Sharpe.
pub fn compute_metric(name: &str, series: &[&[f64]], risk_free_rate: f64) -> Result<MetricValue> {
    let kind: MetricKind = name.parse()?;
    if series.len() != kind.arity() {
        return Err(OrchestrationError::Validation(format!(
            "{} expects {} series, got {}",
            kind,
            kind.arity(),
            series.len()
        )));
    }

    let value = match kind {
        MetricKind::SharpeRatio => MetricValue::Scalar(sharpe_ratio(series[0], risk_free_rate)?),
        MetricKind::BattingAverage => MetricValue::Scalar(batting_average(series[0], series[1])?),
        MetricKind::CaptureRatios => MetricValue::Capture(capture_ratios(series[0], series[1])?),
        MetricKind::TrackingError => MetricValue::Scalar(tracking_error(series[0], series[1])?),
        MetricKind::MaxDrawdown => MetricValue::Scalar(max_drawdown(series[0])?),
    };

    Ok(value)
}

/// Tool wrapper exposing one metric to the model.
pub struct MetricTool {
    kind: MetricKind,
}

impl MetricTool {
    pub fn new(kind: MetricKind) -> Self {
        Self { kind }
    }
}

fn series_schema(description: &str) -> Value {
    json!({
        "type": "array",
        "items": {"type": "number"},
        "description": description,
    })
}

#[async_trait::async_trait]
impl Tool for MetricTool {
    fn name(&self) -> &'static str {
        self.kind.name()
    }

    fn description(&self) -> &'static str {
        match self.kind {
            MetricKind::SharpeRatio => {
                "Sharpe ratio of periodic returns: mean excess return over its sample standard deviation."
            }
            MetricKind::BattingAverage => {
                "Fraction of periods in which the portfolio outperformed the benchmark."
            }
            MetricKind::CaptureRatios => {
                "Up-market and down-market capture ratios of a portfolio against a benchmark."
            }
            MetricKind::TrackingError => {
                "Tracking error: sample standard deviation of portfolio minus benchmark returns."
            }
            MetricKind::MaxDrawdown => {
                "Maximum peak-to-trough decline of cumulative wealth built from periodic returns."
            }
        }
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Financial
    }

    fn parameters(&self) -> Value {
        match self.kind {
            MetricKind::SharpeRatio => json!({
                "type": "object",
                "properties": {
                    "returns": series_schema("Periodic returns as decimals"),
                    "risk_free_rate": {"type": "number", "description": "Per-period risk-free rate, default 0"},
                },
                "required": ["returns"],
            }),
            MetricKind::MaxDrawdown => json!({
                "type": "object",
                "properties": {"returns": series_schema("Periodic returns as decimals")},
                "required": ["returns"],
            }),
            _ => json!({
                "type": "object",
                "properties": {
                    "port": series_schema("Portfolio returns"),
                    "bench": series_schema("Benchmark returns, same length as port"),
                },
                "required": ["port", "bench"],
            }),
        }
    }

    async fn execute(&self, call: &ToolCallRequest) -> Result<Value> {
        let value = match self.kind.arity() {
            1 => {
                let returns = number_series(call, "returns", 0)?;
                let rf = optional_f64(call, "risk_free_rate", 1)?.unwrap_or(0.0);
                compute_metric(self.kind.name(), &[returns.as_slice()], rf)?
            }
            _ => {
                let port = number_series(call, "port", 0)?;
                let bench = number_series(call, "bench", 1)?;
                compute_metric(self.kind.name(), &[port.as_slice(), bench.as_slice()], 0.0)?
            }
        };

        Ok(value.to_json())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_sharpe_ratio() {
        let v = sharpe_ratio(&[0.01, 0.02, 0.03], 0.0).unwrap();
        // mean 0.02, sample std 0.01
        assert!(approx(v, 2.0));

        assert!(matches!(
            compute_metric("sharpe_ratio", &[&[5.0][..]], 0.0),
            Err(OrchestrationError::Validation(_))
        ));
        assert!(matches!(
            sharpe_ratio(&[0.5, 0.5, 0.5], 0.0),
            Err(OrchestrationError::Validation(_))
        ));
    }

    #[test]
    fn test_batting_average() {
        let v = batting_average(&[0.02, 0.01, -0.01, 0.03], &[0.01, 0.02, -0.02, 0.03]).unwrap();
        assert!(approx(v, 0.5));
        assert!(batting_average(&[], &[]).is_err());
    }

    #[test]
    fn test_capture_ratios() {
        let c = capture_ratios(&[0.02, -0.01, 0.04], &[0.01, -0.02, 0.02]).unwrap();
        assert!(approx(c.up_capture.unwrap(), 0.06 / 0.03));
        assert!(approx(c.down_capture.unwrap(), 0.5));

        let only_up = capture_ratios(&[0.02, 0.01], &[0.01, 0.03]).unwrap();
        assert!(only_up.up_capture.is_some());
        assert_eq!(only_up.down_capture, None);

        let json = MetricValue::Capture(only_up).to_json();
        assert!(json["down_capture"].is_null());
    }

    #[test]
    fn test_tracking_error() {
        let v = tracking_error(&[0.02, 0.04], &[0.01, 0.01]).unwrap();
        // active returns 0.01 and 0.03
        assert!(approx(v, 0.02_f64.sqrt() / 10.0));

        assert!(matches!(
            compute_metric("tracking_error", &[&[0.1, 0.2][..], &[0.1][..]], 0.0),
            Err(OrchestrationError::Validation(_))
        ));
    }

    #[test]
    fn test_max_drawdown() {
        let returns = [0.01, -0.005, 0.02, 0.015, -0.01];
        let first = max_drawdown(&returns).unwrap();
        let second = max_drawdown(&returns).unwrap();

        assert!(first < 0.0);
        assert!((first + 0.01).abs() < 1e-12);
        assert_eq!(first, second);

        assert_eq!(max_drawdown(&[0.01, 0.0, 0.03]).unwrap(), 0.0);
        assert!(approx(max_drawdown(&[0.5, -1.0]).unwrap(), -1.0));
        assert!(max_drawdown(&[]).is_err());
    }

    #[test]
    fn test_non_finite_input_rejected() {
        assert!(matches!(
            max_drawdown(&[0.01, f64::NAN]),
            Err(OrchestrationError::Validation(_))
        ));
        assert!(matches!(
            batting_average(&[f64::INFINITY], &[0.0]),
            Err(OrchestrationError::Validation(_))
        ));
    }

    #[test]
    fn test_unknown_metric() {
        assert!(matches!(
            compute_metric("sortino_ratio", &[&[0.1][..]], 0.0),
            Err(OrchestrationError::UnknownTool(_))
        ));
    }

    #[tokio::test]
    async fn test_metric_tool_reads_named_and_positional_args() {
        let tool = MetricTool::new(MetricKind::SharpeRatio);
        let call = ToolCallRequest::new("sharpe_ratio")
            .with_arg(json!([0.01, 0.02, 0.03]))
            .with_kwarg("risk_free_rate", 0.0);

        let value = tool.execute(&call).await.unwrap();
        assert!(approx(value.as_f64().unwrap(), 2.0));

        let tool = MetricTool::new(MetricKind::TrackingError);
        let call = ToolCallRequest::new("tracking_error")
            .with_kwarg("port", json!([0.1, 0.2]))
            .with_kwarg("bench", json!([0.1]));
        assert!(matches!(
            tool.execute(&call).await,
            Err(OrchestrationError::Validation(_))
        ));
    }
}
