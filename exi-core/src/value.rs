//! Typed values carried by EXI events.
//!
//! Values form a closed tagged union; the channel codec dispatches on the
//! tag. Lexical conversion follows the XML Schema datatype canonical forms,
//! since that is what content handlers produce and consume.

use core::fmt;

use base64::Engine;

use crate::error::{Result, ValueError, bail};

/// An unsigned integer of arbitrary precision.
///
/// Stored as base-128 septets, least significant first, which is exactly the
/// shape of the EXI Unsigned Integer wire encoding. Values that fit a
/// machine word never take this form; see [`IntegerValue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BigUnsigned {
    septets: Vec<u8>,
}

impl BigUnsigned {
    /// Build from raw little-endian base-128 digits (each < 128).
    pub(crate) fn from_septets(mut septets: Vec<u8>) -> Self {
        while septets.len() > 1 && septets.last() == Some(&0) {
            septets.pop();
        }
        if septets.is_empty() {
            septets.push(0);
        }
        Self { septets }
    }

    pub(crate) fn septets(&self) -> &[u8] {
        &self.septets
    }

    /// Parse a sequence of ASCII decimal digits.
    pub(crate) fn from_decimal(digits: &str) -> Option<Self> {
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        let mut septets = vec![0_u8];
        for b in digits.bytes() {
            // septets = septets * 10 + digit
            let mut carry = u32::from(b - b'0');
            for s in &mut septets {
                let v = u32::from(*s) * 10 + carry;
                *s = (v & 0x7F) as u8;
                carry = v >> 7;
            }
            while carry > 0 {
                septets.push((carry & 0x7F) as u8);
                carry >>= 7;
            }
        }

        Some(Self::from_septets(septets))
    }

    pub(crate) fn to_decimal(&self) -> String {
        let mut rest = self.septets.clone();
        let mut digits = Vec::new();

        // Repeated division by 10, most significant septet first.
        while rest.iter().any(|&s| s != 0) {
            let mut remainder = 0_u32;
            for s in rest.iter_mut().rev() {
                let v = (remainder << 7) | u32::from(*s);
                *s = (v / 10) as u8;
                remainder = v % 10;
            }
            digits.push(b'0' + remainder as u8);
        }

        if digits.is_empty() {
            digits.push(b'0');
        }
        digits.reverse();
        String::from_utf8(digits).expect("digits are ASCII")
    }

    pub(crate) fn is_zero(&self) -> bool {
        self.septets.iter().all(|&s| s == 0)
    }

    /// The value plus one. Used for the `|n| - 1` bias of signed integers.
    pub(crate) fn succ(&self) -> Self {
        let mut septets = self.septets.clone();
        for s in &mut septets {
            if *s < 127 {
                *s += 1;
                return Self { septets };
            }
            *s = 0;
        }
        septets.push(1);
        Self { septets }
    }

    /// The value minus one. The value must not be zero.
    pub(crate) fn pred(&self) -> Self {
        debug_assert!(!self.is_zero());

        let mut septets = self.septets.clone();
        for s in &mut septets {
            if *s > 0 {
                *s -= 1;
                break;
            }
            *s = 127;
        }
        Self::from_septets(septets)
    }
}

impl fmt::Display for BigUnsigned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal())
    }
}

/// A signed integer of one of three magnitudes.
///
/// Decoding promotes from 32 to 64 bits to arbitrary precision as the value
/// grows; encoding picks the cheapest representation that holds the value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegerValue {
    /// Fits an `i32`.
    Int(i32),
    /// Fits an `i64`.
    Long(i64),
    /// Anything larger.
    Big {
        /// Sign of the value; a zero magnitude is never negative.
        negative: bool,
        /// Absolute value.
        magnitude: BigUnsigned,
    },
}

impl IntegerValue {
    pub(crate) fn from_i64(v: i64) -> Self {
        match i32::try_from(v) {
            Ok(v) => Self::Int(v),
            Err(_) => Self::Long(v),
        }
    }

    /// The value as `u64` if it is non-negative and fits.
    pub(crate) fn as_unsigned(&self) -> Option<u64> {
        match self {
            Self::Int(v) => u64::try_from(*v).ok(),
            Self::Long(v) => u64::try_from(*v).ok(),
            Self::Big { .. } => None,
        }
    }

    pub(crate) fn is_negative(&self) -> bool {
        match self {
            Self::Int(v) => *v < 0,
            Self::Long(v) => *v < 0,
            Self::Big { negative, .. } => *negative,
        }
    }

    /// Parse an XML Schema integer (optional sign, decimal digits).
    pub fn parse(lexical: &str) -> Option<Self> {
        let s = lexical.trim();
        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.strip_prefix('+').unwrap_or(s)),
        };

        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        if let Ok(v) = digits.parse::<i64>() {
            let v = if negative { -v } else { v };
            return Some(Self::from_i64(v));
        }

        let magnitude = BigUnsigned::from_decimal(digits)?;
        Some(Self::Big {
            negative: negative && !magnitude.is_zero(),
            magnitude,
        })
    }
}

impl fmt::Display for IntegerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Long(v) => write!(f, "{v}"),
            Self::Big {
                negative,
                magnitude,
            } => {
                if *negative {
                    write!(f, "-")?;
                }
                write!(f, "{magnitude}")
            }
        }
    }
}

/// An EXI decimal: sign, integral part and reversed fractional part.
///
/// The fractional digits are kept least significant first so that leading
/// zeros behind the decimal point survive integer encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecimalValue {
    /// Sign of the whole value.
    pub negative: bool,
    /// Digits before the decimal point.
    pub integral: IntegerValue,
    /// Digits after the decimal point, in reverse order.
    pub rev_fractional: IntegerValue,
}

impl DecimalValue {
    /// Parse an XML Schema decimal.
    pub fn parse(lexical: &str) -> Option<Self> {
        let s = lexical.trim();
        let (negative, rest) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.strip_prefix('+').unwrap_or(s)),
        };

        let (int_digits, frac_digits) = match rest.split_once('.') {
            Some((i, f)) => (i, f),
            None => (rest, ""),
        };
        if int_digits.is_empty() && frac_digits.is_empty() {
            return None;
        }
        if !int_digits.bytes().all(|b| b.is_ascii_digit())
            || !frac_digits.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }

        let int_digits = if int_digits.is_empty() {
            "0"
        } else {
            int_digits
        };
        let rev: String = frac_digits.trim_end_matches('0').chars().rev().collect();
        let rev = if rev.is_empty() { "0".into() } else { rev };

        Some(Self {
            negative,
            integral: IntegerValue::parse(int_digits)?,
            rev_fractional: IntegerValue::parse(&rev)?,
        })
    }
}

impl fmt::Display for DecimalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative {
            write!(f, "-")?;
        }
        let frac: String = self.rev_fractional.to_string().chars().rev().collect();
        write!(f, "{}.{frac}", self.integral)
    }
}

/// An EXI float: decimal mantissa and base-10 exponent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloatValue {
    /// Decimal mantissa.
    pub mantissa: i64,
    /// Base-10 exponent; [`Self::SPECIAL_EXPONENT`] flags INF/-INF/NaN.
    pub exponent: i32,
}

impl FloatValue {
    /// Exponent value reserved for infinities and NaN.
    pub const SPECIAL_EXPONENT: i32 = -(1 << 14);
    /// Largest regular exponent magnitude.
    pub const MAX_EXPONENT: i32 = (1 << 14) - 1;

    /// Positive infinity.
    pub const INFINITY: Self = Self {
        mantissa: 1,
        exponent: Self::SPECIAL_EXPONENT,
    };
    /// Negative infinity.
    pub const NEG_INFINITY: Self = Self {
        mantissa: -1,
        exponent: Self::SPECIAL_EXPONENT,
    };
    /// Not a number.
    pub const NAN: Self = Self {
        mantissa: 0,
        exponent: Self::SPECIAL_EXPONENT,
    };

    /// Parse an XML Schema float/double lexical value.
    pub fn parse(lexical: &str) -> Option<Self> {
        let s = lexical.trim();
        match s {
            "INF" | "+INF" => return Some(Self::INFINITY),
            "-INF" => return Some(Self::NEG_INFINITY),
            "NaN" => return Some(Self::NAN),
            _ => {}
        }

        let (base, exp) = match s.split_once(['e', 'E']) {
            Some((b, e)) => (b, e.parse::<i32>().ok()?),
            None => (s, 0),
        };

        let (negative, base) = match base.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, base.strip_prefix('+').unwrap_or(base)),
        };
        let (int_digits, frac_digits) = match base.split_once('.') {
            Some((i, f)) => (i, f),
            None => (base, ""),
        };
        if int_digits.is_empty() && frac_digits.is_empty() {
            return None;
        }
        if !int_digits.bytes().all(|b| b.is_ascii_digit())
            || !frac_digits.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }

        let mut mantissa: i64 = 0;
        for b in int_digits.bytes().chain(frac_digits.bytes()) {
            mantissa = mantissa
                .checked_mul(10)?
                .checked_add(i64::from(b - b'0'))?;
        }
        if negative {
            mantissa = -mantissa;
        }
        let exponent = exp.checked_sub(i32::try_from(frac_digits.len()).ok()?)?;
        if exponent < -Self::MAX_EXPONENT || exponent > Self::MAX_EXPONENT {
            return None;
        }

        Some(Self { mantissa, exponent })
    }

    pub(crate) fn is_special(&self) -> bool {
        self.exponent == Self::SPECIAL_EXPONENT
    }
}

impl fmt::Display for FloatValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_special() {
            return match self.mantissa {
                1 => write!(f, "INF"),
                -1 => write!(f, "-INF"),
                _ => write!(f, "NaN"),
            };
        }
        write!(f, "{}E{}", self.mantissa, self.exponent)
    }
}

/// The calendar shape of a date-time value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateTimeKind {
    /// `gYear`: year only.
    GYear,
    /// `gYearMonth`: year and month.
    GYearMonth,
    /// `date`: year, month and day.
    Date,
    /// `dateTime`: full date and time of day.
    DateTime,
    /// `time`: time of day only.
    Time,
    /// `gMonth`: month only.
    GMonth,
    /// `gMonthDay`: month and day.
    GMonthDay,
    /// `gDay`: day only.
    GDay,
}

impl DateTimeKind {
    pub(crate) fn has_year(self) -> bool {
        matches!(
            self,
            Self::GYear | Self::GYearMonth | Self::Date | Self::DateTime
        )
    }

    pub(crate) fn has_month_day(self) -> bool {
        !matches!(self, Self::GYear | Self::Time)
    }

    pub(crate) fn has_time(self) -> bool {
        matches!(self, Self::DateTime | Self::Time)
    }
}

/// A date-time value, stored in the packed component form of the wire format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateTimeValue {
    /// The calendar shape; selects which components are present.
    pub kind: DateTimeKind,
    /// Calendar year; may be negative, never 0.
    pub year: i64,
    /// `month * 32 + day`; absent components are 0.
    pub month_day: u32,
    /// `hour * 4096 + minute * 64 + second`.
    pub time: u32,
    /// Fractional seconds digits, reversed, as an integer.
    pub rev_fractional_secs: Option<u64>,
    /// Timezone offset in minutes, `-840..=840`; `None` means floating.
    pub timezone_minutes: Option<i32>,
}

/// Number of bits of the packed month-day field.
pub(crate) const MONTH_DAY_BITS: u32 = 9;
/// Number of bits of the packed time field.
pub(crate) const TIME_BITS: u32 = 17;
/// Number of bits of the timezone field.
pub(crate) const TIMEZONE_BITS: u32 = 11;
/// Offset added to years on the wire.
pub(crate) const YEAR_OFFSET: i64 = 2000;
/// Offset added to the packed timezone field on the wire.
pub(crate) const TIMEZONE_OFFSET: i32 = 896;

impl DateTimeValue {
    /// Parse the lexical form matching `kind`.
    pub fn parse(kind: DateTimeKind, lexical: &str) -> Option<Self> {
        let mut s = lexical.trim();

        let mut value = Self {
            kind,
            year: 0,
            month_day: 0,
            time: 0,
            rev_fractional_secs: None,
            timezone_minutes: None,
        };

        // Trailing timezone: Z or +hh:mm / -hh:mm.
        if let Some(rest) = s.strip_suffix('Z') {
            value.timezone_minutes = Some(0);
            s = rest;
        } else if s.len() >= 6 {
            let (head, tz) = s.split_at(s.len() - 6);
            let bytes = tz.as_bytes();
            if (bytes[0] == b'+' || bytes[0] == b'-') && bytes[3] == b':' {
                let hours: i32 = tz[1..3].parse().ok()?;
                let minutes: i32 = tz[4..6].parse().ok()?;
                if hours > 14 || minutes > 59 {
                    return None;
                }
                let total = hours * 60 + minutes;
                value.timezone_minutes = Some(if bytes[0] == b'-' { -total } else { total });
                s = head;
            }
        }

        if kind.has_year() {
            let negative = s.starts_with('-');
            let body = if negative { &s[1..] } else { s };
            let year_len = body.find('-').unwrap_or(body.len());
            let year: i64 = body[..year_len].parse().ok()?;
            value.year = if negative { -year } else { year };
            if value.year == 0 {
                return None;
            }
            s = &body[year_len..];
            s = s.strip_prefix('-').unwrap_or(s);
        } else if kind.has_month_day() {
            // gMonth "--MM", gMonthDay "--MM-DD", gDay "---DD".
            s = s.strip_prefix("--")?;
        }

        if kind.has_month_day() {
            let (month, day);
            if kind == DateTimeKind::GDay {
                month = 0;
                day = s.strip_prefix('-')?.parse::<u32>().ok()?;
                s = "";
            } else {
                let month_str = s.get(..2)?;
                month = month_str.parse().ok()?;
                s = &s[2..];
                day = match kind {
                    DateTimeKind::GYearMonth | DateTimeKind::GMonth => 0,
                    _ => {
                        s = s.strip_prefix('-')?;
                        let day_str = s.get(..2)?;
                        s = &s[2..];
                        day_str.parse().ok()?
                    }
                };
            }
            if month > 12 || day > 31 {
                return None;
            }
            value.month_day = month * 32 + day;
        }

        if kind.has_time() {
            s = s.strip_prefix('T').unwrap_or(s);
            let hour: u32 = s.get(..2)?.parse().ok()?;
            let minute: u32 = s.get(3..5)?.parse().ok()?;
            let second: u32 = s.get(6..8)?.parse().ok()?;
            if s.get(2..3)? != ":" || s.get(5..6)? != ":" {
                return None;
            }
            if hour > 24 || minute > 59 || second > 60 {
                return None;
            }
            value.time = hour * 4096 + minute * 64 + second;
            s = &s[8..];

            if let Some(frac) = s.strip_prefix('.') {
                if frac.is_empty() || !frac.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                let rev: String = frac.chars().rev().collect();
                value.rev_fractional_secs = Some(rev.parse().ok()?);
                s = "";
            }
        }

        if s.is_empty() { Some(value) } else { None }
    }

    pub(crate) fn month(&self) -> u32 {
        self.month_day / 32
    }

    pub(crate) fn day(&self) -> u32 {
        self.month_day % 32
    }
}

impl fmt::Display for DateTimeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use DateTimeKind::*;

        if self.kind.has_year() && self.year < 0 {
            write!(f, "-")?;
        }
        let year = self.year.unsigned_abs();

        match self.kind {
            GYear => write!(f, "{year:04}")?,
            GYearMonth => write!(f, "{year:04}-{:02}", self.month())?,
            Date => write!(f, "{year:04}-{:02}-{:02}", self.month(), self.day())?,
            DateTime => write!(
                f,
                "{year:04}-{:02}-{:02}T{:02}:{:02}:{:02}",
                self.month(),
                self.day(),
                self.time / 4096,
                (self.time / 64) % 64,
                self.time % 64
            )?,
            Time => write!(
                f,
                "{:02}:{:02}:{:02}",
                self.time / 4096,
                (self.time / 64) % 64,
                self.time % 64
            )?,
            GMonth => write!(f, "--{:02}", self.month())?,
            GMonthDay => write!(f, "--{:02}-{:02}", self.month(), self.day())?,
            GDay => write!(f, "---{:02}", self.day())?,
        }

        if let Some(rev) = self.rev_fractional_secs {
            let frac: String = rev.to_string().chars().rev().collect();
            write!(f, ".{frac}")?;
        }

        match self.timezone_minutes {
            Some(0) => write!(f, "Z")?,
            Some(tz) => {
                let sign = if tz < 0 { '-' } else { '+' };
                let tz = tz.abs();
                write!(f, "{sign}{:02}:{:02}", tz / 60, tz % 60)?;
            }
            None => {}
        }

        Ok(())
    }
}

/// A qualified-name value, as carried by `xsi:type` attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QNameValue {
    /// Namespace URI of the name.
    pub uri: String,
    /// Local part of the name.
    pub local_name: String,
    /// Prefix, when prefixes are preserved.
    pub prefix: Option<String>,
}

/// The closed union of typed values.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A boolean.
    Boolean(bool),
    /// A character string.
    String(String),
    /// A signed integer.
    Integer(IntegerValue),
    /// A decimal number.
    Decimal(DecimalValue),
    /// A floating point number.
    Float(FloatValue),
    /// A date, time, or partial date.
    DateTime(DateTimeValue),
    /// An opaque byte sequence with its lexical form.
    Binary(BinaryKind, Vec<u8>),
    /// A qualified name.
    QName(QNameValue),
}

impl Value {
    /// Parse a lexical value under the given datatype. `None` means the
    /// lexical form does not validate against the datatype.
    pub fn parse_typed(lexical: &str, datatype: &Datatype) -> Option<Self> {
        match datatype {
            Datatype::String => Some(Self::String(lexical.to_string())),
            Datatype::Boolean => match lexical.trim() {
                "true" | "1" => Some(Self::Boolean(true)),
                "false" | "0" => Some(Self::Boolean(false)),
                _ => None,
            },
            Datatype::Integer => IntegerValue::parse(lexical).map(Self::Integer),
            Datatype::UnsignedInteger => {
                let v = IntegerValue::parse(lexical)?;
                (!v.is_negative()).then_some(Self::Integer(v))
            }
            Datatype::NBitInteger { lower, bits } => {
                let v: i64 = lexical.trim().parse().ok()?;
                let span = if *bits >= 63 { i64::MAX } else { 1_i64 << bits };
                (v >= *lower && v - *lower < span).then(|| Self::Integer(IntegerValue::from_i64(v)))
            }
            Datatype::Decimal => DecimalValue::parse(lexical).map(Self::Decimal),
            Datatype::Float => FloatValue::parse(lexical).map(Self::Float),
            Datatype::DateTime(kind) => DateTimeValue::parse(*kind, lexical).map(Self::DateTime),
            Datatype::Binary(BinaryKind::Hex) => {
                let s: String = lexical.split_whitespace().collect();
                if s.len() % 2 != 0 {
                    return None;
                }
                let mut bytes = Vec::with_capacity(s.len() / 2);
                for chunk in s.as_bytes().chunks(2) {
                    let hi = (chunk[0] as char).to_digit(16)?;
                    let lo = (chunk[1] as char).to_digit(16)?;
                    bytes.push((hi * 16 + lo) as u8);
                }
                Some(Self::Binary(BinaryKind::Hex, bytes))
            }
            Datatype::Binary(BinaryKind::Base64) => {
                // The lexical space permits whitespace between the groups.
                let s: String = lexical.split_whitespace().collect();
                base64::engine::general_purpose::STANDARD
                    .decode(s)
                    .ok()
                    .map(|bytes| Self::Binary(BinaryKind::Base64, bytes))
            }
        }
    }

    /// The lexical form of the value.
    pub fn lexical(&self) -> String {
        self.to_string()
    }

    /// The string content, when the value is a plain string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v}"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Decimal(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::DateTime(v) => write!(f, "{v}"),
            Self::Binary(BinaryKind::Base64, v) => {
                write!(f, "{}", base64::engine::general_purpose::STANDARD.encode(v))
            }
            Self::Binary(BinaryKind::Hex, v) => {
                for byte in v {
                    write!(f, "{byte:02X}")?;
                }
                Ok(())
            }
            Self::QName(v) => match &v.prefix {
                Some(p) if !p.is_empty() => write!(f, "{p}:{}", v.local_name),
                _ => write!(f, "{}", v.local_name),
            },
        }
    }
}

/// Which lexical form a binary datatype uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryKind {
    /// `xsd:base64Binary`.
    Base64,
    /// `xsd:hexBinary`.
    Hex,
}

/// How a typed term is represented on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datatype {
    /// String-table coded character data.
    String,
    /// A single bit (or byte, when byte-packed).
    Boolean,
    /// Sign bit plus unsigned integer.
    Integer,
    /// Unsigned integer only.
    UnsignedInteger,
    /// A bounded integer in a fixed-width field.
    NBitInteger {
        /// Smallest representable value.
        lower: i64,
        /// Field width; `ceil(log2(upper - lower + 1))`.
        bits: u32,
    },
    /// Sign, integral and reverse-fractional parts.
    Decimal,
    /// Mantissa and base-10 exponent.
    Float,
    /// Packed calendar components.
    DateTime(DateTimeKind),
    /// Length-prefixed bytes.
    Binary(BinaryKind),
}

impl Datatype {
    /// The XML Schema built-in type this representation is the default for.
    pub(crate) fn xsd_name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Integer | Self::NBitInteger { .. } => "integer",
            Self::UnsignedInteger => "nonNegativeInteger",
            Self::Decimal => "decimal",
            Self::Float => "double",
            Self::DateTime(kind) => match kind {
                DateTimeKind::GYear => "gYear",
                DateTimeKind::GYearMonth => "gYearMonth",
                DateTimeKind::Date => "date",
                DateTimeKind::DateTime => "dateTime",
                DateTimeKind::Time => "time",
                DateTimeKind::GMonth => "gMonth",
                DateTimeKind::GMonthDay => "gMonthDay",
                DateTimeKind::GDay => "gDay",
            },
            Self::Binary(BinaryKind::Base64) => "base64Binary",
            Self::Binary(BinaryKind::Hex) => "hexBinary",
        }
    }
}

/// Validate that a year fits the signed wire representation.
pub(crate) fn checked_year_offset(year: i64) -> Result<i64> {
    let offset = year - YEAR_OFFSET;
    if offset < i64::from(i32::MIN) || offset > i64::from(i32::MAX) {
        bail!(ValueError::YearOutOfRange);
    }
    Ok(offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn big_unsigned_decimal_round_trip() {
        let v = BigUnsigned::from_decimal("340282366920938463463374607431768211456").unwrap();
        assert_eq!(v.to_decimal(), "340282366920938463463374607431768211456");
        assert_eq!(BigUnsigned::from_decimal("0").unwrap().to_decimal(), "0");
    }

    #[test]
    fn big_unsigned_septets() {
        // 128 = 0 + 1 * 128.
        let v = BigUnsigned::from_decimal("128").unwrap();
        assert_eq!(v.septets(), &[0, 1]);
        // 16384 = 0 + 0 * 128 + 1 * 128^2.
        let v = BigUnsigned::from_decimal("16384").unwrap();
        assert_eq!(v.septets(), &[0, 0, 1]);
    }

    #[test]
    fn integer_promotion() {
        assert_eq!(IntegerValue::parse("12"), Some(IntegerValue::Int(12)));
        assert_eq!(
            IntegerValue::parse("-3000000000"),
            Some(IntegerValue::Long(-3_000_000_000))
        );
        assert!(matches!(
            IntegerValue::parse("99999999999999999999"),
            Some(IntegerValue::Big { negative: false, .. })
        ));
    }

    #[test]
    fn decimal_preserves_leading_fraction_zeros() {
        let v = DecimalValue::parse("-12.34").unwrap();
        assert!(v.negative);
        assert_eq!(v.integral, IntegerValue::Int(12));
        assert_eq!(v.rev_fractional, IntegerValue::Int(43));

        let v = DecimalValue::parse("0.034").unwrap();
        assert_eq!(v.rev_fractional, IntegerValue::Int(430));
        assert_eq!(v.to_string(), "0.034");
    }

    #[test]
    fn decimal_trims_trailing_fraction_zeros() {
        let v = DecimalValue::parse("1.250").unwrap();
        assert_eq!(v.rev_fractional, IntegerValue::Int(52));
        assert_eq!(v.to_string(), "1.25");
    }

    #[test]
    fn float_forms() {
        let v = FloatValue::parse("1.23E4").unwrap();
        assert_eq!(v, FloatValue { mantissa: 123, exponent: 2 });
        assert_eq!(FloatValue::parse("-INF"), Some(FloatValue::NEG_INFINITY));
        assert_eq!(FloatValue::parse("NaN"), Some(FloatValue::NAN));
        assert_eq!(FloatValue::NAN.to_string(), "NaN");
    }

    #[test]
    fn datetime_parses_and_prints() {
        let v = DateTimeValue::parse(DateTimeKind::DateTime, "2003-12-25T11:30:05.5+02:00")
            .unwrap();
        assert_eq!(v.year, 2003);
        assert_eq!(v.month(), 12);
        assert_eq!(v.day(), 25);
        assert_eq!(v.time, 11 * 4096 + 30 * 64 + 5);
        assert_eq!(v.rev_fractional_secs, Some(5));
        assert_eq!(v.timezone_minutes, Some(120));
        assert_eq!(v.to_string(), "2003-12-25T11:30:05.5+02:00");
    }

    #[test]
    fn partial_dates() {
        let v = DateTimeValue::parse(DateTimeKind::GMonthDay, "--02-29").unwrap();
        assert_eq!(v.month_day, 2 * 32 + 29);
        assert_eq!(v.to_string(), "--02-29");

        let v = DateTimeValue::parse(DateTimeKind::GDay, "---31Z").unwrap();
        assert_eq!(v.month_day, 31);
        assert_eq!(v.timezone_minutes, Some(0));

        let v = DateTimeValue::parse(DateTimeKind::GYear, "-0001").unwrap();
        assert_eq!(v.year, -1);
    }

    #[test]
    fn typed_parsing() {
        assert_eq!(
            Value::parse_typed("true", &Datatype::Boolean),
            Some(Value::Boolean(true))
        );
        assert_eq!(Value::parse_typed("maybe", &Datatype::Boolean), None);
        assert_eq!(
            Value::parse_typed("0AFF", &Datatype::Binary(BinaryKind::Hex)),
            Some(Value::Binary(BinaryKind::Hex, vec![0x0A, 0xFF]))
        );
        assert_eq!(
            Value::parse_typed("aGk=", &Datatype::Binary(BinaryKind::Base64)),
            Some(Value::Binary(BinaryKind::Base64, b"hi".to_vec()))
        );
        assert_eq!(
            Value::parse_typed("aGk", &Datatype::Binary(BinaryKind::Base64)),
            None
        );
        assert_eq!(
            Value::parse_typed("7", &Datatype::NBitInteger { lower: 0, bits: 3 }),
            Some(Value::Integer(IntegerValue::Int(7)))
        );
        assert_eq!(
            Value::parse_typed("8", &Datatype::NBitInteger { lower: 0, bits: 3 }),
            None
        );
    }

    #[test]
    fn binary_lexical_forms_round_trip() {
        for (kind, lexical) in [
            (BinaryKind::Base64, "aGVsbG8="),
            (BinaryKind::Hex, "68656C6C6F"),
        ] {
            let value = Value::parse_typed(lexical, &Datatype::Binary(kind)).unwrap();
            assert_eq!(value, Value::Binary(kind, b"hello".to_vec()));
            assert_eq!(value.lexical(), lexical);
        }
    }
}
