use std::sync::OnceLock;

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  TimeDelta,
  TimeZone,
  Utc
};
use chrono_tz::Tz;
use regex::Regex;

pub const DEFAULT_TIMEZONE: &str = "UTC";

#[must_use]
pub fn to_millis(
  dt: DateTime<Utc>
) -> i64 {
  dt.timestamp_millis()
}

#[must_use]
pub fn from_millis(
  millis: i64
) -> Option<DateTime<Utc>> {
  DateTime::<Utc>::from_timestamp_millis(
    millis
  )
}

pub fn parse_timezone(
  raw: &str
) -> anyhow::Result<Tz> {
  raw.trim().parse::<Tz>().map_err(
    |err| {
      anyhow!(
        "invalid timezone `{}`: {err}",
        raw.trim()
      )
    }
  )
}

#[must_use]
pub fn format_date(
  dt: DateTime<Utc>,
  tz: Tz
) -> String {
  dt.with_timezone(&tz)
    .format("%Y-%m-%d")
    .to_string()
}

fn offset_regex() -> &'static Regex {
  static OFFSET: OnceLock<Regex> =
    OnceLock::new();
  OFFSET.get_or_init(|| {
    Regex::new(
      r"^([+-]?)(\d+)\s*([dw])$"
    )
    .expect("offset regex is valid")
  })
}

/// Parses a due-date expression relative to `now` in timezone `tz`.
///
/// Accepted: `now`, `today`, `tomorrow`, `yesterday`, `YYYY-MM-DD`,
/// `YYYY-MM-DDTHH:MM[:SS]`, RFC 3339, and day/week offsets like `+3d`
/// or `2w`. Calendar dates resolve to local midnight.
#[tracing::instrument(skip(now, tz), fields(input = input))]
pub fn parse_date_expr(
  input: &str,
  now: DateTime<Utc>,
  tz: Tz
) -> anyhow::Result<DateTime<Utc>> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();

  match lower.as_str() {
    | "" => {
      return Err(anyhow!(
        "date expression is empty"
      ));
    }
    | "now" => return Ok(now),
    | "today" => {
      let date = now
        .with_timezone(&tz)
        .date_naive();
      return local_midnight(
        date, tz, "today"
      );
    }
    | "tomorrow" => {
      let today = parse_date_expr(
        "today", now, tz
      )?;
      return Ok(
        today + TimeDelta::days(1)
      );
    }
    | "yesterday" => {
      let today = parse_date_expr(
        "today", now, tz
      )?;
      return Ok(
        today - TimeDelta::days(1)
      );
    }
    | _ => {}
  }

  if let Some(caps) =
    offset_regex().captures(&lower)
  {
    let amount: i64 = caps[2]
      .parse()
      .context("invalid offset amount")?;
    let days = match &caps[3] {
      | "w" => amount.checked_mul(7),
      | _ => Some(amount)
    };
    let days = if &caps[1] == "-" {
      days.map(|d| -d)
    } else {
      days
    };
    let today = parse_date_expr(
      "today", now, tz
    )?;
    return days
      .and_then(TimeDelta::try_days)
      .and_then(|delta| {
        today.checked_add_signed(delta)
      })
      .ok_or_else(|| {
        anyhow!(
          "date offset out of range: \
           {token}"
        )
      });
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token, "%Y-%m-%d"
    )
  {
    return local_midnight(
      date, tz, "calendar date"
    );
  }

  if let Ok(dt) =
    DateTime::parse_from_rfc3339(token)
  {
    return Ok(dt.with_timezone(&Utc));
  }

  for fmt in
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"]
  {
    if let Ok(naive) =
      NaiveDateTime::parse_from_str(
        token, fmt
      )
    {
      return to_utc_from_local(
        naive, tz, "local datetime"
      );
    }
  }

  Err(anyhow!(
    "unrecognized date expression: \
     {token}"
  ))
}

fn local_midnight(
  date: NaiveDate,
  tz: Tz,
  label: &str
) -> anyhow::Result<DateTime<Utc>> {
  let midnight = date
    .and_hms_opt(0, 0, 0)
    .ok_or_else(|| {
      anyhow!(
        "failed to construct \
         midnight for {label}"
      )
    })?;
  to_utc_from_local(
    midnight, tz, label
  )
}

fn to_utc_from_local(
  naive: NaiveDateTime,
  tz: Tz,
  label: &str
) -> anyhow::Result<DateTime<Utc>> {
  match tz.from_local_datetime(&naive) {
    | LocalResult::Single(dt) => {
      Ok(dt.with_timezone(&Utc))
    }
    | LocalResult::Ambiguous(
      earliest,
      _
    ) => {
      Ok(earliest.with_timezone(&Utc))
    }
    | LocalResult::None => {
      Err(anyhow!(
        "{label} {naive} does not \
         exist in timezone {tz}"
      ))
    }
  }
}

#[cfg(test)]
mod tests {
  use chrono::{
    TimeZone,
    Utc
  };

  use super::{
    format_date,
    from_millis,
    parse_date_expr,
    parse_timezone,
    to_millis
  };

  fn now() -> chrono::DateTime<Utc> {
    Utc
      .with_ymd_and_hms(
        2026, 2, 17, 23, 0, 0
      )
      .single()
      .expect("valid now")
  }

  #[test]
  fn parses_calendar_date_at_local_midnight()
   {
    let tz = parse_timezone(
      "America/Mexico_City"
    )
    .expect("tz");
    let parsed = parse_date_expr(
      "2024-01-05",
      now(),
      tz
    )
    .expect("parse date");
    assert_eq!(
      format_date(parsed, tz),
      "2024-01-05"
    );
    assert_eq!(
      parsed.to_rfc3339(),
      "2024-01-05T06:00:00+00:00"
    );
  }

  #[test]
  fn tomorrow_follows_local_calendar() {
    let tz = parse_timezone(
      "America/Mexico_City"
    )
    .expect("tz");
    let parsed =
      parse_date_expr("tomorrow", now(), tz)
        .expect("parse tomorrow");
    assert_eq!(
      format_date(parsed, tz),
      "2026-02-18"
    );
  }

  #[test]
  fn parses_day_and_week_offsets() {
    let tz = chrono_tz::UTC;
    let plus_three =
      parse_date_expr("+3d", now(), tz)
        .expect("parse +3d");
    assert_eq!(
      format_date(plus_three, tz),
      "2026-02-20"
    );

    let two_weeks =
      parse_date_expr("2w", now(), tz)
        .expect("parse 2w");
    assert_eq!(
      format_date(two_weeks, tz),
      "2026-03-03"
    );
  }

  #[test]
  fn oversized_offsets_are_errors() {
    let tz = chrono_tz::UTC;
    for expr in [
      "+9999999999999d",
      "+2000000000000000000w",
      "-9999999999999d"
    ] {
      let err =
        parse_date_expr(expr, now(), tz)
          .expect_err("out of range");
      assert!(
        err
          .to_string()
          .contains("out of range"),
        "{expr}: {err}"
      );
    }
  }

  #[test]
  fn rejects_garbage() {
    assert!(
      parse_date_expr(
        "someday",
        now(),
        chrono_tz::UTC
      )
      .is_err()
    );
    assert!(parse_timezone("Mars/Olympus").is_err());
  }

  #[test]
  fn millis_round_trip() {
    let ts = now();
    assert_eq!(
      from_millis(to_millis(ts)),
      Some(ts)
    );
  }
}
