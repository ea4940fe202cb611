use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::{DataError, KfError, KfResult};

/// Exchanges recognized by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Exchange {
    Shenzhen,
    Shanghai,
    Beijing,
}

impl Exchange {
    /// Symbol suffix used in the `000001.SZ` notation.
    pub fn suffix(&self) -> &'static str {
        match self {
            Exchange::Shenzhen => "SZ",
            Exchange::Shanghai => "SH",
            Exchange::Beijing => "BJ",
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.suffix())
    }
}

/// Represents an equity symbol with exchange information
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol {
    pub code: String,
    pub exchange: Exchange,
}

impl Symbol {
    pub fn new(code: &str, exchange: Exchange) -> Self {
        Self {
            code: code.to_string(),
            exchange,
        }
    }

    pub fn shenzhen(code: &str) -> Self {
        Self::new(code, Exchange::Shenzhen)
    }

    pub fn shanghai(code: &str) -> Self {
        Self::new(code, Exchange::Shanghai)
    }

    /// Parse the `<code>.<exchange>` notation, e.g. `000001.SZ`.
    pub fn parse(s: &str) -> KfResult<Self> {
        let (code, suffix) = s.rsplit_once('.').ok_or_else(|| {
            KfError::from(DataError::InvalidFormat {
                message: format!("symbol '{s}' is missing an exchange suffix"),
            })
        })?;

        let exchange = match suffix {
            "SZ" | "sz" => Exchange::Shenzhen,
            "SH" | "sh" => Exchange::Shanghai,
            "BJ" | "bj" => Exchange::Beijing,
            other => {
                return Err(DataError::InvalidFormat {
                    message: format!("unknown exchange suffix '{other}' in symbol '{s}'"),
                }
                .into())
            }
        };

        if code.is_empty() {
            return Err(DataError::InvalidFormat {
                message: format!("symbol '{s}' has an empty code"),
            }
            .into());
        }

        Ok(Self::new(code, exchange))
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.code, self.exchange.suffix())
    }
}

impl FromStr for Symbol {
    type Err = KfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Symbol::parse(s)
    }
}

/// Time frequency of a bar series
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Frequency {
    #[serde(rename = "1m")]
    Min1,
    #[serde(rename = "5m")]
    Min5,
    #[serde(rename = "15m")]
    Min15,
    #[serde(rename = "30m")]
    Min30,
    #[serde(rename = "1h")]
    Hour1,
    #[serde(rename = "4h")]
    Hour4,
    #[serde(rename = "1d")]
    Day1,
    #[serde(rename = "1w")]
    Week1,
    #[serde(rename = "1mo")]
    Month1,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Min1 => "1m",
            Frequency::Min5 => "5m",
            Frequency::Min15 => "15m",
            Frequency::Min30 => "30m",
            Frequency::Hour1 => "1h",
            Frequency::Hour4 => "4h",
            Frequency::Day1 => "1d",
            Frequency::Week1 => "1w",
            Frequency::Month1 => "1mo",
        }
    }

    pub fn parse(s: &str) -> KfResult<Self> {
        match s {
            "1m" => Ok(Frequency::Min1),
            "5m" => Ok(Frequency::Min5),
            "15m" => Ok(Frequency::Min15),
            "30m" => Ok(Frequency::Min30),
            "1h" => Ok(Frequency::Hour1),
            "4h" => Ok(Frequency::Hour4),
            "1d" => Ok(Frequency::Day1),
            "1w" => Ok(Frequency::Week1),
            "1mo" => Ok(Frequency::Month1),
            other => Err(DataError::InvalidFormat {
                message: format!("unknown frequency tag '{other}'"),
            }
            .into()),
        }
    }

    pub fn to_seconds(&self) -> u64 {
        match self {
            Frequency::Min1 => 60,
            Frequency::Min5 => 300,
            Frequency::Min15 => 900,
            Frequency::Min30 => 1800,
            Frequency::Hour1 => 3600,
            Frequency::Hour4 => 14400,
            Frequency::Day1 => 86400,
            Frequency::Week1 => 604800,
            Frequency::Month1 => 2629746, // Average month
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Precomputed indicator columns carried alongside a bar
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Indicators {
    pub ma5: Option<Decimal>,
    pub ma10: Option<Decimal>,
    pub ma20: Option<Decimal>,
    pub ma60: Option<Decimal>,
    pub macd_dif: Option<Decimal>,
    pub macd_dea: Option<Decimal>,
    pub macd_histogram: Option<Decimal>,
    pub rsi_14: Option<Decimal>,
    pub boll_upper: Option<Decimal>,
    pub boll_middle: Option<Decimal>,
    pub boll_lower: Option<Decimal>,
}

impl Indicators {
    pub fn is_empty(&self) -> bool {
        *self == Indicators::default()
    }
}

/// OHLCV bar with traded amount and optional indicators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: Symbol,
    pub timestamp: DateTime<Utc>,
    pub frequency: Frequency,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: i64,
    pub amount: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indicators: Option<Indicators>,
}

impl Bar {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: Symbol,
        timestamp: DateTime<Utc>,
        frequency: Frequency,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: i64,
        amount: Decimal,
    ) -> Self {
        Self {
            symbol,
            timestamp,
            frequency,
            open,
            high,
            low,
            close,
            volume,
            amount,
            indicators: None,
        }
    }

    pub fn with_indicators(mut self, indicators: Indicators) -> Self {
        self.indicators = Some(indicators);
        self
    }

    /// Check the OHLC ordering invariant and that volume is non-negative.
    pub fn validate(&self) -> KfResult<()> {
        let body_low = self.open.min(self.close);
        let body_high = self.open.max(self.close);

        if self.low > body_low || body_high > self.high {
            return Err(crate::validation_error!(
                "bar for {} at {} violates low <= open/close <= high: o={} h={} l={} c={}",
                self.symbol,
                self.timestamp,
                self.open,
                self.high,
                self.low,
                self.close
            ));
        }

        if self.volume < 0 {
            return Err(crate::validation_error!(
                "bar for {} at {} has negative volume {}",
                self.symbol,
                self.timestamp,
                self.volume
            ));
        }

        Ok(())
    }
}
