use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;

/// The single zone every reminder and sweep decision is made in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    Local,
    Fixed(FixedOffset),
    /// IANA zone; follows its daylight-saving rules.
    Named(Tz),
}

impl Zone {
    /// Accepts `local`, `UTC`/`Z`, an IANA name such as `Europe/Moscow`, or an
    /// offset such as `+03:00` / `-0530`.
    pub fn parse(raw: &str) -> Result<Self> {
        let value = raw.trim();

        if value.eq_ignore_ascii_case("local") || value.is_empty() {
            return Ok(Self::Local);
        }
        if value.eq_ignore_ascii_case("utc") || value.eq_ignore_ascii_case("z") {
            return Ok(Self::Fixed(Utc.fix()));
        }

        let (sign, rest) = if let Some(rest) = value.strip_prefix('+') {
            (1, rest)
        } else if let Some(rest) = value.strip_prefix('-') {
            (-1, rest)
        } else {
            return value.parse::<Tz>().map(Self::Named).map_err(|_| {
                anyhow!("Invalid timezone: {value}. Use local, UTC, a name like Europe/Moscow or an offset like +03:00")
            });
        };

        let digits = rest.replace(':', "");
        if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
            bail!("Invalid timezone offset: {value}. Example: +03:00");
        }

        let hours = digits[..2].parse::<i32>()?;
        let minutes = digits[2..].parse::<i32>()?;
        if hours > 14 || minutes > 59 {
            bail!("Timezone offset out of range: {value}");
        }

        match FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)) {
            Some(offset) => Ok(Self::Fixed(offset)),
            None => bail!("Timezone offset out of range: {value}"),
        }
    }

    pub fn now(&self) -> NaiveDateTime {
        self.localize(Utc::now())
    }

    pub fn localize(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        match self {
            Self::Local => instant.with_timezone(&Local).naive_local(),
            Self::Fixed(offset) => offset.from_utc_datetime(&instant.naive_utc()).naive_local(),
            Self::Named(tz) => instant.with_timezone(tz).naive_local(),
        }
    }
}

/// Parses `--at` style overrides: `YYYY-MM-DDTHH:MM` or `YYYY-MM-DD HH:MM`.
pub fn parse_wall_clock(raw: &str) -> Result<NaiveDateTime> {
    ["%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw.trim(), format).ok())
        .ok_or_else(|| anyhow!("Invalid date-time: {raw}. Example: 2024-06-05T09:55"))
}
