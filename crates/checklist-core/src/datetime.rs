use std::cell::Cell;
use std::sync::OnceLock;

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  Days,
  Local,
  NaiveDate
};
use regex::Regex;

use crate::model::DateRange;

pub const DATE_FORMAT: &str =
  "%Y-%m-%d";

/// Source of the host's current calendar date.
pub trait Clock {
  fn today(&self) -> NaiveDate;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn today(&self) -> NaiveDate {
    Local::now().date_naive()
  }
}

/// Clock pinned to a settable day.
#[derive(Debug, Clone)]
pub struct FixedClock {
  day: Cell<NaiveDate>
}

impl FixedClock {
  pub fn new(day: NaiveDate) -> Self {
    Self {
      day: Cell::new(day)
    }
  }

  pub fn set(&self, day: NaiveDate) {
    self.day.set(day);
  }
}

impl Clock for FixedClock {
  fn today(&self) -> NaiveDate {
    self.day.get()
  }
}

#[must_use]
pub fn format_day(
  day: NaiveDate
) -> String {
  day.format(DATE_FORMAT).to_string()
}

/// Inclusive, ascending run of days from
/// `start` to `end`. Empty when
/// `end < start`.
#[must_use]
pub fn dates_in_range(
  start: NaiveDate,
  end: NaiveDate
) -> Vec<NaiveDate> {
  let mut out = Vec::new();
  let mut current = start;
  while current <= end {
    out.push(current);
    match current.succ_opt() {
      | Some(next) => current = next,
      | None => break
    }
  }
  out
}

/// `days`-long window ending on `today`.
#[must_use]
pub fn trailing_window(
  today: NaiveDate,
  days: u32
) -> DateRange {
  let back =
    u64::from(days.max(1) - 1);
  let start = today
    .checked_sub_days(Days::new(back))
    .unwrap_or(NaiveDate::MIN);
  DateRange::new(start, today)
}

fn offset_regex() -> &'static Regex {
  static OFFSET_RE: OnceLock<Regex> =
    OnceLock::new();
  OFFSET_RE.get_or_init(|| {
    Regex::new(r"^([+-])(\d{1,5})d$")
      .expect("offset regex is valid")
  })
}

#[tracing::instrument(skip(today), fields(input = input))]
pub fn parse_date_expr(
  input: &str,
  today: NaiveDate
) -> anyhow::Result<NaiveDate> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();

  match lower.as_str() {
    | "today" => return Ok(today),
    | "tomorrow" => {
      return today.succ_opt().ok_or_else(
        || anyhow!("date out of range")
      );
    }
    | "yesterday" => {
      return today.pred_opt().ok_or_else(
        || anyhow!("date out of range")
      );
    }
    | _ => {}
  }

  if let Some(caps) =
    offset_regex().captures(&lower)
  {
    let amount: u64 = caps[2]
      .parse()
      .context("invalid day offset")?;
    let shifted = if &caps[1] == "-" {
      today.checked_sub_days(
        Days::new(amount)
      )
    } else {
      today.checked_add_days(
        Days::new(amount)
      )
    };
    return shifted.ok_or_else(|| {
      anyhow!(
        "day offset out of range: \
         {token}"
      )
    });
  }

  NaiveDate::parse_from_str(
    token,
    DATE_FORMAT
  )
  .with_context(|| {
    format!(
      "unrecognized date '{token}' \
       (expected YYYY-MM-DD, today, \
       yesterday, tomorrow, +Nd or -Nd)"
    )
  })
}
