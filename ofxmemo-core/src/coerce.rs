//! Value coercion: OFX timestamps to the target timezone, optional `NONE` to null.

use std::sync::LazyLock;

use chrono::{FixedOffset, NaiveDate, TimeZone};
use chrono_tz::Tz;
use regex::Regex;

use crate::document::Scalar;
use crate::error::{OfxError, Result};

/// `YYYYMMDDhhmmss[.fff][offset:tzname]`
static OFX_DATETIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^(?P<y>\d{4})(?P<mo>\d{2})(?P<d>\d{2})",
        r"(?P<h>\d{2})(?P<mi>\d{2})(?P<s>\d{2})",
        r"(?:\.\d+)?",
        r"\[(?P<off>[+-]?\d{1,2}):(?P<tz>[^\]]*)\]$"
    ))
    .expect("OFX datetime pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParserOptions {
    /// Turn the literal `NONE` into a null value.
    pub none_to_null: bool,
    /// Zone every OFX timestamp is converted into.
    pub target_timezone: Tz,
    /// Keep every value as the raw source string. Used when a document is
    /// parsed only to be written back.
    pub raw_values: bool,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            none_to_null: false,
            target_timezone: Tz::UTC,
            raw_values: false,
        }
    }
}

impl ParserOptions {
    pub fn raw() -> Self {
        Self {
            raw_values: true,
            ..Self::default()
        }
    }

    pub fn with_timezone(mut self, tz: &str) -> Result<Self> {
        self.target_timezone = parse_timezone(tz)?;
        Ok(self)
    }
}

/// Parse an IANA zone name like "Europe/London".
pub fn parse_timezone(tz: &str) -> Result<Tz> {
    tz.parse()
        .map_err(|_| OfxError::InvalidTimezone(tz.to_string()))
}

/// Coerce one raw token into a scalar.
pub fn coerce(raw: &str, opts: &ParserOptions) -> Scalar {
    if opts.raw_values {
        return Scalar::text(raw);
    }

    if opts.none_to_null && raw == "NONE" {
        return Scalar::Null;
    }

    match parse_ofx_datetime(raw.trim(), opts.target_timezone) {
        Some(ts) => Scalar::Timestamp(ts),
        None => Scalar::text(raw),
    }
}

fn parse_ofx_datetime(raw: &str, target: Tz) -> Option<chrono::NaiveDateTime> {
    let caps = OFX_DATETIME.captures(raw)?;
    let num = |name: &str| caps[name].parse::<u32>().ok();

    let offset_hours: i32 = caps["off"].parse().ok()?;
    let offset = FixedOffset::east_opt(offset_hours * 3600)?;

    let naive = NaiveDate::from_ymd_opt(caps["y"].parse().ok()?, num("mo")?, num("d")?)?
        .and_hms_opt(num("h")?, num("mi")?, num("s")?)?;

    let local = offset.from_local_datetime(&naive).single()?;
    Some(local.with_timezone(&target).naive_local())
}
