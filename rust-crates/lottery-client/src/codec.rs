use ethers::types::{
    Address,
    H256,
    U256,
};
use serde_json::Value;
use thiserror::Error;

pub const TOKEN_DECIMALS: usize = 18;
pub const DISPLAY_DECIMALS: usize = 6;
pub const PPM_PER_PERCENT: u32 = 10_000;
pub const MAX_PPM: u32 = 1_000_000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("`{0}` is not a decimal number")]
    NotANumber(String),
    #[error("`{0}` is negative")]
    Negative(String),
    #[error("`{0}` does not fit in 256 bits")]
    Overflow(String),
    #[error("win chance `{0}`% must be between 0 and 100")]
    OutOfRange(String),
    #[error("cannot read a wide integer from {0}")]
    Unsupported(String),
}

/// Scales `input` by `10^digits`, dropping any further fractional digits.
/// Returns the scaled integer together with the first dropped digit.
fn scale_decimal(input: &str, digits: usize) -> Result<(U256, u8), CodecError> {
    let trimmed = input.trim();
    if trimmed.starts_with('-') {
        return Err(CodecError::Negative(trimmed.to_owned()));
    }
    let unsigned = trimmed.strip_prefix('+').unwrap_or(trimmed);
    let (whole, fraction) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if (whole.is_empty() && fraction.is_empty())
        || !all_digits(whole)
        || !all_digits(fraction)
    {
        return Err(CodecError::NotANumber(trimmed.to_owned()));
    }

    let overflow = || CodecError::Overflow(trimmed.to_owned());
    let push_digit = |acc: U256, digit: u8| {
        acc.checked_mul(U256::from(10u8))
            .and_then(|v| v.checked_add(U256::from(digit)))
    };

    let mut value = U256::zero();
    for b in whole.bytes() {
        value = push_digit(value, b - b'0').ok_or_else(overflow)?;
    }
    let fraction = fraction.as_bytes();
    for i in 0..digits {
        let digit = fraction.get(i).map_or(0, |b| b - b'0');
        value = push_digit(value, digit).ok_or_else(overflow)?;
    }
    let next = fraction.get(digits).map_or(0, |b| b - b'0');
    Ok((value, next))
}

pub fn to_base_units(amount: &str) -> Result<U256, CodecError> {
    scale_decimal(amount, TOKEN_DECIMALS).map(|(value, _)| value)
}

/// Renders base units as a token amount with six decimals, rounding half-up.
/// Zero renders as `"0"`.
pub fn to_decimal_string(value: U256) -> String {
    if value.is_zero() {
        return "0".to_owned();
    }
    let unit = U256::exp10(TOKEN_DECIMALS - DISPLAY_DECIMALS);
    let (mut scaled, remainder) = value.div_mod(unit);
    if remainder >= unit / U256::from(2u8) {
        scaled += U256::one();
    }
    let (whole, fraction) = scaled.div_mod(U256::exp10(DISPLAY_DECIMALS));
    format!("{whole}.{:0width$}", fraction.as_u64(), width = DISPLAY_DECIMALS)
}

/// Converts a percentage such as `"1.25"` into parts per million, rounding
/// half-up at the fourth decimal.
pub fn ppm_from_percent(percent: &str) -> Result<u32, CodecError> {
    let (scaled, next) = scale_decimal(percent, 4).map_err(|err| match err {
        CodecError::Overflow(raw) => CodecError::OutOfRange(raw),
        other => other,
    })?;
    let rounded = if next >= 5 {
        scaled.saturating_add(U256::one())
    } else {
        scaled
    };
    if rounded > U256::from(MAX_PPM) {
        return Err(CodecError::OutOfRange(percent.trim().to_owned()));
    }
    Ok(rounded.as_u32())
}

pub fn percent_from_ppm(ppm: u32) -> f64 {
    f64::from(ppm) / f64::from(PPM_PER_PERCENT)
}

pub fn format_percent(ppm: u32) -> String {
    let whole = ppm / PPM_PER_PERCENT;
    let fraction = ppm % PPM_PER_PERCENT;
    if fraction == 0 {
        return whole.to_string();
    }
    let digits = format!("{fraction:04}");
    format!("{whole}.{}", digits.trim_end_matches('0'))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RawWide {
    Native(U256),
    Text(String),
    Limbs {
        low: u128,
        high: u128,
    },
}

impl RawWide {
    pub fn limbs(value: U256) -> Self {
        RawWide::Limbs {
            low: value.low_u128(),
            high: (value >> 128).low_u128(),
        }
    }

    pub fn normalize(&self) -> Result<U256, CodecError> {
        match self {
            RawWide::Native(value) => Ok(*value),
            RawWide::Text(text) => parse_integer_text(text),
            RawWide::Limbs { low, high } => {
                Ok((U256::from(*high) << 128) | U256::from(*low))
            }
        }
    }
}

impl From<U256> for RawWide {
    fn from(value: U256) -> Self {
        RawWide::Native(value)
    }
}

impl TryFrom<&Value> for RawWide {
    type Error = CodecError;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        match value {
            Value::Number(n) => n
                .as_u64()
                .map(|v| RawWide::Native(U256::from(v)))
                .ok_or_else(|| CodecError::Unsupported(n.to_string())),
            Value::String(s) => Ok(RawWide::Text(s.clone())),
            Value::Object(map) => {
                let low = map.get("low").ok_or_else(|| {
                    CodecError::Unsupported("object without `low`".to_owned())
                })?;
                let high = map.get("high").ok_or_else(|| {
                    CodecError::Unsupported("object without `high`".to_owned())
                })?;
                Ok(RawWide::Limbs {
                    low: limb_from_json(low)?,
                    high: limb_from_json(high)?,
                })
            }
            other => Err(CodecError::Unsupported(other.to_string())),
        }
    }
}

fn limb_from_json(value: &Value) -> Result<u128, CodecError> {
    let wide = match value {
        Value::Number(n) => n
            .as_u64()
            .map(U256::from)
            .ok_or_else(|| CodecError::Unsupported(n.to_string()))?,
        Value::String(s) => parse_integer_text(s)?,
        other => return Err(CodecError::Unsupported(other.to_string())),
    };
    if wide > U256::from(u128::MAX) {
        return Err(CodecError::Overflow(wide.to_string()));
    }
    Ok(wide.low_u128())
}

fn parse_integer_text(text: &str) -> Result<U256, CodecError> {
    let trimmed = text.trim();
    let parsed = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) if !hex.is_empty() => U256::from_str_radix(hex, 16).ok(),
        Some(_) => None,
        None => U256::from_dec_str(trimmed).ok(),
    };
    parsed.ok_or_else(|| CodecError::Unsupported(format!("`{trimmed}`")))
}

pub fn short_address(address: Address) -> String {
    let full = format!("{address:#x}");
    format!("{}…{}", &full[..6], &full[full.len() - 4..])
}

pub fn short_hash(hash: H256) -> String {
    let full = format!("{hash:#x}");
    format!("{}…", &full[..10])
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn to_base_units__scales_whole_and_fractional_parts() {
        assert_eq!(to_base_units("1").unwrap(), U256::exp10(18));
        assert_eq!(to_base_units("0.0001").unwrap(), U256::exp10(14));
        assert_eq!(to_base_units(" 2.5 ").unwrap(), U256::from(25u64) * U256::exp10(17));
        assert_eq!(to_base_units(".5").unwrap(), U256::from(5u64) * U256::exp10(17));
    }

    #[test]
    fn to_base_units__rounds_down_past_eighteen_decimals() {
        // given
        let amount = "0.0000000000000000019";

        // when
        let units = to_base_units(amount).unwrap();

        // then
        assert_eq!(units, U256::one());
    }

    #[test]
    fn to_base_units__rejects_non_numeric_and_negative_input() {
        assert!(matches!(to_base_units("abc"), Err(CodecError::NotANumber(_))));
        assert!(matches!(to_base_units(""), Err(CodecError::NotANumber(_))));
        assert!(matches!(to_base_units("."), Err(CodecError::NotANumber(_))));
        assert!(matches!(to_base_units("1.2.3"), Err(CodecError::NotANumber(_))));
        assert!(matches!(to_base_units("1e5"), Err(CodecError::NotANumber(_))));
        assert!(matches!(to_base_units("-1"), Err(CodecError::Negative(_))));
    }

    #[test]
    fn to_base_units__rejects_values_beyond_256_bits() {
        let huge = "9".repeat(80);
        assert!(matches!(to_base_units(&huge), Err(CodecError::Overflow(_))));
    }

    #[test]
    fn to_decimal_string__uses_six_fixed_decimals() {
        assert_eq!(to_decimal_string(U256::zero()), "0");
        assert_eq!(to_decimal_string(U256::exp10(18)), "1.000000");
        assert_eq!(to_decimal_string(U256::exp10(14)), "0.000100");
        assert_eq!(to_decimal_string(U256::one()), "0.000000");
    }

    #[test]
    fn to_decimal_string__rounds_half_up_at_sixth_decimal() {
        // 0.0000005 rounds up, 0.00000049 rounds down
        assert_eq!(to_decimal_string(U256::from(500_000_000_000u64)), "0.000001");
        assert_eq!(to_decimal_string(U256::from(499_999_999_999u64)), "0.000000");
        // 0.9999995 carries into the whole part
        assert_eq!(
            to_decimal_string(U256::from(999_999_500_000_000_000u64)),
            "1.000000"
        );
    }

    #[test]
    fn to_decimal_string__handles_max_value() {
        let rendered = to_decimal_string(U256::MAX);
        assert!(rendered.contains('.'));
    }

    #[test]
    fn ppm_from_percent__rounds_half_up() {
        assert_eq!(ppm_from_percent("1").unwrap(), 10_000);
        assert_eq!(ppm_from_percent("0.00005").unwrap(), 1);
        assert_eq!(ppm_from_percent("0.00004").unwrap(), 0);
        assert_eq!(ppm_from_percent("12.34567").unwrap(), 123_457);
        assert_eq!(ppm_from_percent("100").unwrap(), MAX_PPM);
    }

    #[test]
    fn ppm_from_percent__rejects_out_of_range() {
        assert!(matches!(ppm_from_percent("100.00005"), Err(CodecError::OutOfRange(_))));
        assert!(matches!(ppm_from_percent("250"), Err(CodecError::OutOfRange(_))));
        assert!(matches!(
            ppm_from_percent(&"9".repeat(90)),
            Err(CodecError::OutOfRange(_))
        ));
        assert!(matches!(ppm_from_percent("-1"), Err(CodecError::Negative(_))));
        assert!(matches!(ppm_from_percent("lots"), Err(CodecError::NotANumber(_))));
    }

    #[test]
    fn format_percent__trims_trailing_zeros() {
        assert_eq!(format_percent(10_000), "1");
        assert_eq!(format_percent(12_500), "1.25");
        assert_eq!(format_percent(1), "0.0001");
        assert_eq!(percent_from_ppm(12_500), 1.25);
    }

    #[test]
    fn normalize__accepts_every_wire_shape() {
        // given
        let expected = (U256::from(7u64) << 128) + U256::from(9u64);

        // then
        assert_eq!(RawWide::Native(expected).normalize().unwrap(), expected);
        assert_eq!(
            RawWide::Text(expected.to_string()).normalize().unwrap(),
            expected
        );
        assert_eq!(
            RawWide::Text(format!("{expected:#x}")).normalize().unwrap(),
            expected
        );
        assert_eq!(
            RawWide::Limbs { low: 9, high: 7 }.normalize().unwrap(),
            expected
        );
        assert_eq!(RawWide::limbs(expected), RawWide::Limbs { low: 9, high: 7 });
    }

    #[test]
    fn normalize__rejects_garbage_text() {
        assert!(RawWide::Text("0x".into()).normalize().is_err());
        assert!(RawWide::Text("twelve".into()).normalize().is_err());
    }

    #[test]
    fn try_from_json__reads_numbers_strings_and_limb_objects() {
        // given
        let number = json!(42);
        let text = json!("0x2a");
        let limbs = json!({ "low": "0x2a", "high": 0 });
        let float = json!(1.5);

        // then
        for value in [&number, &text, &limbs] {
            let raw = RawWide::try_from(value).unwrap();
            assert_eq!(raw.normalize().unwrap(), U256::from(42u64));
        }
        assert!(RawWide::try_from(&float).is_err());
        assert!(RawWide::try_from(&json!({ "low": 1 })).is_err());
        assert!(RawWide::try_from(&json!(null)).is_err());
    }

    #[test]
    fn short_address__keeps_prefix_and_suffix() {
        let address = Address::from_low_u64_be(0xabcd);
        assert_eq!(short_address(address), "0x0000…abcd");
        assert_eq!(short_hash(H256::repeat_byte(0x11)), "0x11111111…");
    }

    fn round_to_display(whole: u64, fraction: &str) -> String {
        let padded = format!("{fraction:0<19}");
        let base_is_zero = whole == 0 && padded[..TOKEN_DECIMALS].bytes().all(|b| b == b'0');
        if base_is_zero {
            return "0".to_owned();
        }
        let mut kept: u64 = padded[..6].parse().unwrap();
        let mut whole = whole;
        if padded.as_bytes()[6] >= b'5' {
            kept += 1;
            if kept == 1_000_000 {
                kept = 0;
                whole += 1;
            }
        }
        format!("{whole}.{kept:06}")
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
        #[test]
        fn to_decimal_string__inverts_to_base_units_at_display_precision(
            whole in 0u64..1_000_000_000,
            fraction in "[0-9]{0,24}",
        ) {
            let input = if fraction.is_empty() {
                whole.to_string()
            } else {
                format!("{whole}.{fraction}")
            };
            let rendered = to_decimal_string(to_base_units(&input).unwrap());
            prop_assert_eq!(rendered, round_to_display(whole, &fraction));
        }

        #[test]
        fn percent_from_ppm__inverts_ppm_from_percent_at_four_decimals(
            whole in 0u32..100,
            fraction in "[0-9]{0,8}",
        ) {
            let input = format!("{whole}.{fraction}");
            let padded = format!("{fraction:0<5}");
            let mut expected: u32 = whole * PPM_PER_PERCENT + padded[..4].parse::<u32>().unwrap();
            if padded.as_bytes()[4] >= b'5' {
                expected += 1;
            }
            let ppm = ppm_from_percent(&input).unwrap();
            prop_assert_eq!(ppm, expected);
            let back = percent_from_ppm(ppm);
            prop_assert!((back - f64::from(expected) / 10_000.0).abs() < 1e-9);
        }

        #[test]
        fn normalize__limbs_agree_with_native(low in any::<u128>(), high in any::<u128>()) {
            let native = (U256::from(high) << 128) | U256::from(low);
            prop_assert_eq!(RawWide::Limbs { low, high }.normalize().unwrap(), native);
            prop_assert_eq!(RawWide::Text(native.to_string()).normalize().unwrap(), native);
        }
    }
}
