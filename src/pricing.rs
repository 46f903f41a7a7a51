// Booking price engine
// Night counting and total price for the live pricing shown on booking forms

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use thiserror::Error;

pub const MILLIS_PER_DAY: i64 = 86_400_000;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PricingError {
    #[error("Invalid date input: {0}")]
    InvalidInput(String),
}

// Anything a booking form can hand us as a date
#[derive(Debug, Clone, PartialEq)]
pub enum DateInput {
    Text(String),
    Instant(DateTime<Utc>),
    Date(NaiveDate),
    TimestampMillis(i64),
}

impl DateInput {
    // Blank text and the zero timestamp count as "not provided"
    pub fn is_blank(&self) -> bool {
        match self {
            DateInput::Text(text) => text.trim().is_empty(),
            DateInput::TimestampMillis(millis) => *millis == 0,
            DateInput::Instant(_) | DateInput::Date(_) => false,
        }
    }

    pub fn to_instant(&self) -> Result<DateTime<Utc>, PricingError> {
        match self {
            DateInput::Instant(instant) => Ok(*instant),
            DateInput::Date(date) => Ok(midnight_utc(*date)),
            DateInput::TimestampMillis(millis) => DateTime::from_timestamp_millis(*millis)
                .ok_or_else(|| PricingError::InvalidInput(format!("timestamp {millis}"))),
            DateInput::Text(text) => parse_text(text),
        }
    }
}

fn midnight_utc(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::default()).and_utc()
}

// Accepts RFC 3339, a naive date-time (taken as UTC) or a bare date (UTC midnight)
fn parse_text(text: &str) -> Result<DateTime<Utc>, PricingError> {
    let text = text.trim();

    if let Ok(instant) = DateTime::parse_from_rfc3339(text) {
        return Ok(instant.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .map(midnight_utc)
        .map_err(|_| PricingError::InvalidInput(format!("'{text}' is not a date")))
}

impl From<&str> for DateInput {
    fn from(value: &str) -> Self {
        DateInput::Text(value.to_string())
    }
}

impl From<String> for DateInput {
    fn from(value: String) -> Self {
        DateInput::Text(value)
    }
}

impl From<DateTime<Utc>> for DateInput {
    fn from(value: DateTime<Utc>) -> Self {
        DateInput::Instant(value)
    }
}

impl From<NaiveDate> for DateInput {
    fn from(value: NaiveDate) -> Self {
        DateInput::Date(value)
    }
}

impl From<i64> for DateInput {
    fn from(value: i64) -> Self {
        DateInput::TimestampMillis(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DateRange {
    pub check_in: DateTime<Utc>,
    pub check_out: DateTime<Utc>,
}

impl DateRange {
    pub fn parse(
        check_in: impl Into<DateInput>,
        check_out: impl Into<DateInput>,
    ) -> Result<Self, PricingError> {
        Ok(Self {
            check_in: check_in.into().to_instant()?,
            check_out: check_out.into().to_instant()?,
        })
    }

    /// Number of billable nights, never less than one.
    ///
    /// Inverted and zero-length ranges are not rejected here; they bill a
    /// single night. Callers that need check-out after check-in must check
    /// that themselves.
    pub fn nights(&self) -> i64 {
        let span_ms = (self.check_out - self.check_in).num_milliseconds();
        let nights = ceil_div(span_ms, MILLIS_PER_DAY);
        nights.max(1)
    }
}

fn ceil_div(value: i64, divisor: i64) -> i64 {
    let quotient = value / divisor;
    if value % divisor > 0 {
        quotient + 1
    } else {
        quotient
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricingInput {
    pub price_per_night: f64,
    pub range: DateRange,
}

impl PricingInput {
    pub fn nights(&self) -> i64 {
        self.range.nights()
    }

    pub fn total(&self) -> f64 {
        self.price_per_night * self.nights() as f64
    }
}

pub fn calculate_total_nights(
    check_in: impl Into<DateInput>,
    check_out: impl Into<DateInput>,
) -> Result<i64, PricingError> {
    Ok(DateRange::parse(check_in, check_out)?.nights())
}

/// Total stay price shown next to the booking form.
///
/// Missing inputs (no price, a zero or NaN price, or an absent/blank date)
/// yield `0` rather than an error so the form can render before it is
/// filled in. No currency rounding is applied.
pub fn calculate_total_price<D: Into<DateInput>>(
    price_per_night: Option<f64>,
    check_in: Option<D>,
    check_out: Option<D>,
) -> Result<f64, PricingError> {
    let price = match price_per_night {
        Some(price) if price != 0.0 && !price.is_nan() => price,
        _ => return Ok(0.0),
    };
    let (check_in, check_out) = match (check_in.map(Into::into), check_out.map(Into::into)) {
        (Some(check_in), Some(check_out)) if !check_in.is_blank() && !check_out.is_blank() => {
            (check_in, check_out)
        }
        _ => return Ok(0.0),
    };

    let input = PricingInput {
        price_per_night: price,
        range: DateRange::parse(check_in, check_out)?,
    };
    Ok(input.total())
}
