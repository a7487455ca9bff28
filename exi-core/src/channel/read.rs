//! Decoding side of the typed channel.

use crate::bit_reader::BitReader;
use crate::error::{BitstreamError, Result, ValueError, bail, err};
use crate::value::{
    BigUnsigned, DateTimeKind, DateTimeValue, DecimalValue, FloatValue, IntegerValue,
    MONTH_DAY_BITS, TIME_BITS, TIMEZONE_BITS, TIMEZONE_OFFSET, YEAR_OFFSET,
};

pub(crate) struct DecoderChannel<'a> {
    bits: BitReader<'a>,
    byte_packed: bool,
}

impl<'a> DecoderChannel<'a> {
    pub(crate) fn new(data: &'a [u8], byte_packed: bool) -> Self {
        Self {
            bits: BitReader::new(data),
            byte_packed,
        }
    }

    /// Look ahead one byte; used for cookie detection.
    pub(crate) fn peek_byte(&self) -> Result<u8> {
        self.bits.peek_byte()
    }

    pub(crate) fn read_bits(&mut self, num_bits: u32) -> Result<u32> {
        self.bits.read_bits(num_bits)
    }

    pub(crate) fn align(&mut self) {
        self.bits.align();
    }

    pub(crate) fn skip_bytes(&mut self, len: usize) -> Result<()> {
        self.bits.skip_bytes(len)
    }

    /// Switch the alignment mode. The header always starts bit-packed;
    /// the negotiated body mode takes over afterwards.
    pub(crate) fn set_byte_packed(&mut self, byte_packed: bool) {
        self.byte_packed = byte_packed;
    }

    pub(crate) fn decode_boolean(&mut self) -> Result<bool> {
        if self.byte_packed {
            match self.bits.read_byte()? {
                0 => Ok(false),
                1 => Ok(true),
                _ => err!(BitstreamError::InvalidBoolean),
            }
        } else {
            Ok(self.bits.read_bit()? == 1)
        }
    }

    /// Read an n-bit unsigned integer. Zero bits decode to zero.
    pub(crate) fn decode_n_bit(&mut self, num_bits: u32) -> Result<u32> {
        if num_bits == 0 {
            return Ok(0);
        }

        if self.byte_packed {
            let num_bytes = num_bits.div_ceil(8);
            let mut value = 0_u32;
            for i in 0..num_bytes {
                value |= u32::from(self.bits.read_byte()?) << (8 * i);
            }
            Ok(value)
        } else {
            self.bits.read_bits(num_bits)
        }
    }

    /// Read an unsigned integer that is expected to fit 64 bits.
    ///
    /// Lengths, identifiers and similar quantities go through here; a value
    /// beyond `u64` cannot be meant and flags a corrupt stream.
    pub(crate) fn decode_unsigned_u64(&mut self) -> Result<u64> {
        let mut value = 0_u64;
        let mut shift = 0_u32;

        loop {
            let byte = self.bits.read_bits(8)?;
            let septet = u64::from(byte & 0x7F);
            if shift >= 63 && septet > (u64::MAX >> shift) {
                bail!(BitstreamError::OversizedQuantity);
            }
            value |= septet << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift > 63 {
                bail!(BitstreamError::OversizedQuantity);
            }
        }
    }

    /// Read an unsigned integer, promoting to arbitrary precision on
    /// overflow.
    pub(crate) fn decode_unsigned_integer(&mut self) -> Result<IntegerValue> {
        let mut septets: Vec<u8> = Vec::new();

        loop {
            let byte = self.bits.read_bits(8)?;
            septets.push((byte & 0x7F) as u8);
            if byte & 0x80 == 0 {
                break;
            }
        }

        Ok(unsigned_from_septets(septets, false))
    }

    /// Read a signed integer: sign bit, then the biased magnitude.
    pub(crate) fn decode_integer(&mut self) -> Result<IntegerValue> {
        let negative = self.decode_boolean()?;
        if !negative {
            return self.decode_unsigned_integer();
        }

        let mut septets: Vec<u8> = Vec::new();
        loop {
            let byte = self.bits.read_bits(8)?;
            septets.push((byte & 0x7F) as u8);
            if byte & 0x80 == 0 {
                break;
            }
        }

        Ok(unsigned_from_septets(septets, true))
    }

    pub(crate) fn decode_decimal(&mut self) -> Result<DecimalValue> {
        let negative = self.decode_boolean()?;
        let integral = self.decode_unsigned_integer()?;
        let rev_fractional = self.decode_unsigned_integer()?;

        Ok(DecimalValue {
            negative,
            integral,
            rev_fractional,
        })
    }

    pub(crate) fn decode_float(&mut self) -> Result<FloatValue> {
        let mantissa = match self.decode_integer()? {
            IntegerValue::Int(v) => i64::from(v),
            IntegerValue::Long(v) => v,
            IntegerValue::Big { .. } => bail!(ValueError::ComponentTooWide),
        };
        let exponent = match self.decode_integer()? {
            IntegerValue::Int(v) => v,
            _ => bail!(ValueError::ComponentTooWide),
        };

        Ok(FloatValue { mantissa, exponent })
    }

    pub(crate) fn decode_datetime(&mut self, kind: DateTimeKind) -> Result<DateTimeValue> {
        let mut value = DateTimeValue {
            kind,
            year: 0,
            month_day: 0,
            time: 0,
            rev_fractional_secs: None,
            timezone_minutes: None,
        };

        if kind.has_year() {
            let offset = match self.decode_integer()? {
                IntegerValue::Int(v) => i64::from(v),
                IntegerValue::Long(v) => v,
                IntegerValue::Big { .. } => bail!(ValueError::YearOutOfRange),
            };
            value.year = offset
                .checked_add(YEAR_OFFSET)
                .ok_or(ValueError::YearOutOfRange)?;
        }

        if kind.has_month_day() {
            value.month_day = self.decode_n_bit(MONTH_DAY_BITS)?;
        }

        if kind.has_time() {
            value.time = self.decode_n_bit(TIME_BITS)?;
            if self.decode_boolean()? {
                value.rev_fractional_secs = Some(self.decode_unsigned_u64()?);
            }
        }

        if self.decode_boolean()? {
            let field = self.decode_n_bit(TIMEZONE_BITS)? as i32;
            let packed = field - TIMEZONE_OFFSET;
            value.timezone_minutes = Some((packed / 64) * 60 + packed % 64);
        }

        Ok(value)
    }

    pub(crate) fn decode_binary(&mut self) -> Result<Vec<u8>> {
        let len = self.usize_length()?;
        self.bits.read_bytes(len)
    }

    /// Read a length-prefixed string.
    pub(crate) fn decode_string(&mut self) -> Result<String> {
        let len = self.usize_length()?;
        self.decode_chars(len)
    }

    /// Read `len` code points, each as an unsigned integer.
    pub(crate) fn decode_chars(&mut self, len: usize) -> Result<String> {
        // A hostile length must not reserve memory before any byte of it
        // has actually been read.
        let mut out = String::with_capacity(len.min(4096));
        for _ in 0..len {
            let cp = self.decode_unsigned_u64()?;
            let c = u32::try_from(cp)
                .ok()
                .and_then(char::from_u32)
                .ok_or(ValueError::MalformedCodePoint)?;
            out.push(c);
        }
        Ok(out)
    }

    fn usize_length(&mut self) -> Result<usize> {
        usize::try_from(self.decode_unsigned_u64()?)
            .map_err(|_| BitstreamError::OversizedQuantity.into())
    }
}

/// Assemble an integer from little-endian septets, with the `-1` bias
/// applied when `negative`.
fn unsigned_from_septets(septets: Vec<u8>, negative: bool) -> IntegerValue {
    // Ten septets hold up to 70 bits; check the top one for u64 fit.
    let fits = septets.len() < 10 || (septets.len() == 10 && septets[9] <= 1);

    if fits {
        let mut value = 0_u64;
        for (i, &s) in septets.iter().enumerate() {
            value |= u64::from(s) << (7 * i);
        }

        if negative {
            // The wire holds |n| - 1.
            if value <= i64::MAX as u64 {
                return IntegerValue::from_i64(-(value as i64) - 1);
            }
        } else if value <= i64::MAX as u64 {
            return IntegerValue::from_i64(value as i64);
        }
    }

    let magnitude = BigUnsigned::from_septets(septets);
    let magnitude = if negative { magnitude.succ() } else { magnitude };
    IntegerValue::Big {
        negative,
        magnitude,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bit_channel(data: &[u8]) -> DecoderChannel<'_> {
        DecoderChannel::new(data, false)
    }

    #[test]
    fn varint_layout() {
        assert_eq!(bit_channel(&[0x00]).decode_unsigned_u64().unwrap(), 0);
        assert_eq!(bit_channel(&[0x7F]).decode_unsigned_u64().unwrap(), 127);
        assert_eq!(
            bit_channel(&[0x80, 0x01]).decode_unsigned_u64().unwrap(),
            128
        );
        assert_eq!(
            bit_channel(&[0x80, 0x80, 0x01])
                .decode_unsigned_u64()
                .unwrap(),
            16384
        );
    }

    #[test]
    fn varint_promotes_past_u64() {
        // 21 septets of 0x7F is far beyond 64 bits.
        let mut data = vec![0xFF_u8; 20];
        data.push(0x7F);
        let v = bit_channel(&data).decode_unsigned_integer().unwrap();
        assert!(matches!(v, IntegerValue::Big { negative: false, .. }));
    }

    #[test]
    fn signed_bias() {
        // -1 in byte-packed mode: sign byte 1, magnitude varint 0.
        let mut ch = DecoderChannel::new(&[0x01, 0x00], true);
        assert_eq!(ch.decode_integer().unwrap(), IntegerValue::Int(-1));
    }

    #[test]
    fn decimal_components() {
        // -12.34: sign 1, integral 12, reverse fraction 43 (byte-packed).
        let mut ch = DecoderChannel::new(&[0x01, 12, 43], true);
        let v = ch.decode_decimal().unwrap();
        assert!(v.negative);
        assert_eq!(v.integral, IntegerValue::Int(12));
        assert_eq!(v.rev_fractional, IntegerValue::Int(43));
        assert_eq!(v.to_string(), "-12.34");
    }

    #[test]
    fn string_chars() {
        let mut ch = bit_channel(&[0x02, 0x68, 0x69]);
        assert_eq!(ch.decode_string().unwrap(), "hi");
    }

    #[test]
    fn n_bit_zero_width() {
        let mut ch = bit_channel(&[]);
        assert_eq!(ch.decode_n_bit(0).unwrap(), 0);
    }

    #[test]
    fn byte_packed_n_bit_is_little_endian() {
        let mut ch = DecoderChannel::new(&[0x34, 0x12], true);
        assert_eq!(ch.decode_n_bit(12).unwrap(), 0x1234);
    }

    #[test]
    fn eof_mid_varint() {
        let mut ch = bit_channel(&[0x80]);
        assert_eq!(
            ch.decode_unsigned_u64(),
            Err(crate::error::ExiError::UnexpectedEndOfStream)
        );
    }
}
