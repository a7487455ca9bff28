//! Encoding side of the typed channel.

use std::io::Write;

use crate::bit_writer::BitWriter;
use crate::error::{Result, ValueError, bail};
use crate::value::{
    DateTimeValue, FloatValue, IntegerValue, MONTH_DAY_BITS, TIME_BITS, TIMEZONE_BITS,
    TIMEZONE_OFFSET, checked_year_offset,
};

pub(crate) struct EncoderChannel<W: Write> {
    bits: BitWriter<W>,
    byte_packed: bool,
}

impl<W: Write> EncoderChannel<W> {
    pub(crate) fn new(sink: W, byte_packed: bool) -> Self {
        Self {
            bits: BitWriter::new(sink),
            byte_packed,
        }
    }

    pub(crate) fn write_bits(&mut self, value: u32, num_bits: u32) -> Result<()> {
        self.bits.write_bits(value, num_bits)
    }

    pub(crate) fn align(&mut self) -> Result<()> {
        self.bits.align()
    }

    pub(crate) fn flush(&mut self) -> Result<()> {
        self.bits.flush()
    }

    /// Switch the alignment mode. The header always starts bit-packed;
    /// the negotiated body mode takes over afterwards.
    pub(crate) fn set_byte_packed(&mut self, byte_packed: bool) {
        self.byte_packed = byte_packed;
    }

    pub(crate) fn into_sink(self) -> W {
        self.bits.into_sink()
    }

    /// Number of whole bytes emitted so far.
    pub(crate) fn len(&self) -> usize {
        self.bits.len()
    }

    /// Number of bits buffered ahead of the next whole byte.
    pub(crate) fn pending_bits(&self) -> u32 {
        self.bits.pending_bits()
    }

    pub(crate) fn encode_boolean(&mut self, value: bool) -> Result<()> {
        if self.byte_packed {
            self.bits.write_byte(value as u8)
        } else {
            self.bits.write_bit(value as u32)
        }
    }

    /// Write an n-bit unsigned integer. Zero bits write nothing.
    pub(crate) fn encode_n_bit(&mut self, value: u32, num_bits: u32) -> Result<()> {
        debug_assert!(num_bits == 32 || value < (1_u64 << num_bits) as u32);

        if num_bits == 0 {
            return Ok(());
        }

        if self.byte_packed {
            let num_bytes = num_bits.div_ceil(8);
            for i in 0..num_bytes {
                self.bits.write_byte((value >> (8 * i)) as u8)?;
            }
            Ok(())
        } else {
            self.bits.write_bits(value, num_bits)
        }
    }

    pub(crate) fn encode_unsigned_u64(&mut self, mut value: u64) -> Result<()> {
        loop {
            let septet = (value & 0x7F) as u32;
            value >>= 7;
            if value == 0 {
                return self.write_bits(septet, 8);
            }
            self.write_bits(septet | 0x80, 8)?;
        }
    }

    pub(crate) fn encode_unsigned_integer(&mut self, value: &IntegerValue) -> Result<()> {
        match value {
            IntegerValue::Int(v) => {
                let Ok(v) = u64::try_from(*v) else {
                    bail!(ValueError::NegativeLength);
                };
                self.encode_unsigned_u64(v)
            }
            IntegerValue::Long(v) => {
                let Ok(v) = u64::try_from(*v) else {
                    bail!(ValueError::NegativeLength);
                };
                self.encode_unsigned_u64(v)
            }
            IntegerValue::Big {
                negative,
                magnitude,
            } => {
                if *negative {
                    bail!(ValueError::NegativeLength);
                }
                self.write_septets(magnitude.septets())
            }
        }
    }

    /// Write a signed integer: sign bit, then `|n| - 1` for negatives or
    /// `n` otherwise.
    pub(crate) fn encode_integer(&mut self, value: &IntegerValue) -> Result<()> {
        let negative = value.is_negative();
        self.encode_boolean(negative)?;

        match value {
            IntegerValue::Int(v) => self.encode_signed_magnitude(i64::from(*v), negative),
            IntegerValue::Long(v) => self.encode_signed_magnitude(*v, negative),
            IntegerValue::Big { magnitude, .. } => {
                if negative {
                    self.write_septets(magnitude.pred().septets())
                } else {
                    self.write_septets(magnitude.septets())
                }
            }
        }
    }

    pub(crate) fn encode_decimal(
        &mut self,
        negative: bool,
        integral: &IntegerValue,
        rev_fractional: &IntegerValue,
    ) -> Result<()> {
        self.encode_boolean(negative)?;
        self.encode_unsigned_integer(integral)?;
        self.encode_unsigned_integer(rev_fractional)
    }

    pub(crate) fn encode_float(&mut self, value: &FloatValue) -> Result<()> {
        if !value.is_special() && value.exponent.abs() > FloatValue::MAX_EXPONENT {
            bail!(ValueError::ComponentTooWide);
        }
        self.encode_integer(&IntegerValue::from_i64(value.mantissa))?;
        self.encode_integer(&IntegerValue::from_i64(i64::from(value.exponent)))
    }

    pub(crate) fn encode_datetime(&mut self, value: &DateTimeValue) -> Result<()> {
        let kind = value.kind;

        if kind.has_year() {
            let offset = checked_year_offset(value.year)?;
            self.encode_integer(&IntegerValue::from_i64(offset))?;
        }

        if kind.has_month_day() {
            if value.month_day >= 1 << MONTH_DAY_BITS {
                bail!(ValueError::CalendarOutOfRange);
            }
            self.encode_n_bit(value.month_day, MONTH_DAY_BITS)?;
        }

        if kind.has_time() {
            if value.time >= 1 << TIME_BITS {
                bail!(ValueError::CalendarOutOfRange);
            }
            self.encode_n_bit(value.time, TIME_BITS)?;
            match value.rev_fractional_secs {
                Some(frac) => {
                    self.encode_boolean(true)?;
                    self.encode_unsigned_u64(frac)?;
                }
                None => self.encode_boolean(false)?,
            }
        }

        match value.timezone_minutes {
            Some(tz) => {
                let packed = (tz / 60) * 64 + tz % 60;
                let field = packed + TIMEZONE_OFFSET;
                if field < 0 || field >= 1 << TIMEZONE_BITS {
                    bail!(ValueError::CalendarOutOfRange);
                }
                self.encode_boolean(true)?;
                self.encode_n_bit(field as u32, TIMEZONE_BITS)
            }
            None => self.encode_boolean(false),
        }
    }

    pub(crate) fn encode_binary(&mut self, bytes: &[u8]) -> Result<()> {
        self.encode_unsigned_u64(bytes.len() as u64)?;
        self.bits.write_bytes(bytes)
    }

    /// Write a length-prefixed string.
    pub(crate) fn encode_string(&mut self, value: &str) -> Result<()> {
        self.encode_unsigned_u64(value.chars().count() as u64)?;
        self.encode_chars(value)
    }

    /// Write each code point of `value` as an unsigned integer.
    pub(crate) fn encode_chars(&mut self, value: &str) -> Result<()> {
        for c in value.chars() {
            self.encode_unsigned_u64(u64::from(u32::from(c)))?;
        }
        Ok(())
    }

    fn encode_signed_magnitude(&mut self, value: i64, negative: bool) -> Result<()> {
        let magnitude = if negative {
            // The wire holds |n| - 1; rewritten to avoid overflow at i64::MIN.
            (-(value + 1)) as u64
        } else {
            value as u64
        };
        self.encode_unsigned_u64(magnitude)
    }

    fn write_septets(&mut self, septets: &[u8]) -> Result<()> {
        for (i, &s) in septets.iter().enumerate() {
            let continuation = if i + 1 < septets.len() { 0x80 } else { 0 };
            self.write_bits(u32::from(s) | continuation, 8)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::DecoderChannel;
    use crate::value::{DateTimeKind, DateTimeValue};

    fn bit_encoded(f: impl FnOnce(&mut EncoderChannel<&mut Vec<u8>>)) -> Vec<u8> {
        let mut out = Vec::new();
        let mut ch = EncoderChannel::new(&mut out, false);
        f(&mut ch);
        ch.align().unwrap();
        out
    }

    #[test]
    fn varint_layout() {
        assert_eq!(bit_encoded(|c| c.encode_unsigned_u64(0).unwrap()), [0x00]);
        assert_eq!(bit_encoded(|c| c.encode_unsigned_u64(127).unwrap()), [0x7F]);
        assert_eq!(
            bit_encoded(|c| c.encode_unsigned_u64(128).unwrap()),
            [0x80, 0x01]
        );
        assert_eq!(
            bit_encoded(|c| c.encode_unsigned_u64(16384).unwrap()),
            [0x80, 0x80, 0x01]
        );
    }

    #[test]
    fn signed_minus_one_byte_packed() {
        let mut out = Vec::new();
        let mut ch = EncoderChannel::new(&mut out, true);
        ch.encode_integer(&IntegerValue::Int(-1)).unwrap();
        assert_eq!(out, [0x01, 0x00]);
    }

    #[test]
    fn string_hi() {
        assert_eq!(
            bit_encoded(|c| c.encode_string("hi").unwrap()),
            [0x02, 0x68, 0x69]
        );
    }

    #[test]
    fn i64_min_round_trips() {
        let out = bit_encoded(|c| c.encode_integer(&IntegerValue::Long(i64::MIN)).unwrap());
        let mut ch = DecoderChannel::new(&out, false);
        assert_eq!(ch.decode_integer().unwrap(), IntegerValue::Long(i64::MIN));
    }

    #[test]
    fn big_integer_round_trips() {
        let v = IntegerValue::parse("-123456789012345678901234567890").unwrap();
        let out = bit_encoded(|c| c.encode_integer(&v).unwrap());
        let mut ch = DecoderChannel::new(&out, false);
        let back = ch.decode_integer().unwrap();
        assert_eq!(back.to_string(), "-123456789012345678901234567890");
    }

    #[test]
    fn gyear_before_common_era() {
        // Year -1 is offset by 2000: sign 1, varint 2000.
        let v = DateTimeValue::parse(DateTimeKind::GYear, "-0001").unwrap();
        let out = bit_encoded(|c| c.encode_datetime(&v).unwrap());
        let mut ch = DecoderChannel::new(&out, false);
        let back = ch.decode_datetime(DateTimeKind::GYear).unwrap();
        assert_eq!(back.year, -1);
        assert_eq!(back.to_string(), "-0001");
    }

    #[test]
    fn datetime_round_trips_with_timezone() {
        let v = DateTimeValue::parse(DateTimeKind::DateTime, "2026-08-01T09:15:30.25-05:30")
            .unwrap();
        let out = bit_encoded(|c| c.encode_datetime(&v).unwrap());
        let mut ch = DecoderChannel::new(&out, false);
        let back = ch.decode_datetime(DateTimeKind::DateTime).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn binary_round_trips_unaligned() {
        let mut out = Vec::new();
        let mut ch = EncoderChannel::new(&mut out, false);
        ch.write_bits(1, 1).unwrap();
        ch.encode_binary(&[0xDE, 0xAD, 0xBE]).unwrap();
        ch.align().unwrap();

        let mut rd = DecoderChannel::new(&out, false);
        assert_eq!(rd.read_bits(1).unwrap(), 1);
        assert_eq!(rd.decode_binary().unwrap(), vec![0xDE, 0xAD, 0xBE]);
    }
}
