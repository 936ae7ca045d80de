use std::str::FromStr;

use crate::TidewayError;

/// Period units accepted in a rate expression, with their multipliers to
/// seconds.
const UNITS: &[(&str, f64)] = &[
    ("ns", 1e-9),
    ("us", 1e-6),
    ("ms", 1e-3),
    ("s", 1.0),
    ("m", 60.0),
    ("h", 3_600.0),
    ("d", 86_400.0),
    ("y", YEAR_SECS),
];

/// Seconds in a (non-leap) year. Also used as the offset for speculative
/// reservation scores, which must sort after anything in a live window.
pub(crate) const YEAR_SECS: f64 = 31_536_000.0;

/// A parsed rate expression: how many requests are admitted per sliding
/// window.
///
/// Parse one from a string of the form `<max_requests>/<period><unit>`:
///
/// ```
/// use tideway::Rate;
///
/// let rate: Rate = "20/5s".parse().unwrap();
/// assert_eq!(rate.max_requests(), 20);
/// assert_eq!(rate.interval(), 5.0);
/// ```
///
/// The period defaults to `1` when omitted (`"100/s"` is 100 per second).
/// Units: `ns`, `us`, `ms`, `s`, `m`, `h`, `d`, `y`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rate {
    max_requests: u64,
    interval: f64,
}

impl Rate {
    /// Maximum number of admissions per window.
    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    /// Window length in seconds.
    pub fn interval(&self) -> f64 {
        self.interval
    }
}

impl FromStr for Rate {
    type Err = TidewayError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let err = || TidewayError::RateParse(raw.to_string());

        let (requests, period) = raw.split_once('/').ok_or_else(err)?;
        if requests.is_empty() || !requests.bytes().all(|b| b.is_ascii_digit()) {
            return Err(err());
        }
        let max_requests: u64 = requests.parse().map_err(|_| err())?;

        let digits = period.bytes().take_while(u8::is_ascii_digit).count();
        let (value, unit) = period.split_at(digits);
        let value: u64 = if value.is_empty() {
            1
        } else {
            value.parse().map_err(|_| err())?
        };

        let unit_secs = UNITS
            .iter()
            .find_map(|(name, secs)| (*name == unit).then_some(*secs))
            .ok_or_else(err)?;

        if max_requests == 0 || value == 0 {
            return Err(err());
        }

        Ok(Self {
            max_requests,
            interval: value as f64 * unit_secs,
        })
    }
}
