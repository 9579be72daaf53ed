use crate::error::BillingError;
use crate::models::DateRange;
use chrono::NaiveDate;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct OutstandingReportParams {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// Defaults to today.
    pub as_of: Option<NaiveDate>,
}

/// `start_date`/`end_date` filter shared by the summary reports.
#[derive(Debug, Default, Deserialize)]
pub struct ReportRangeParams {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

/// Inclusive range; an inverted range is a validation error.
pub fn date_range(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<DateRange, BillingError> {
    if let (Some(start), Some(end)) = (start, end) {
        if start > end {
            return Err(BillingError::validation(format!(
                "start_date {} is after end_date {}",
                start, end
            )));
        }
    }
    Ok(DateRange::new(start, end))
}
