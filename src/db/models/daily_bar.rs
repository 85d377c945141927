use chrono::NaiveDate;

/// One calendar day (UTC) of a coin's resampled price history.
///
/// Days without any observation carry the previous day's close in every price
/// field. Moving averages are `None` until their full window is available.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct DailyBar {
    pub date: NaiveDate,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
    pub sma_50: Option<f64>,
    pub sma_200: Option<f64>,
}
