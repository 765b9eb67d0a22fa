//! Binary/decimal size parsing and pretty-printing (spec §4.A).
//!
//! Ported field-for-field from `src/utils/sizes.c`'s `bd_utils_size_from_spec`
//! and `bd_utils_size_human_readable`.

use crate::error::BlockdevError;
use regex::Regex;
use std::sync::OnceLock;

const PREFIXES: [&str; 7] = ["", "Ki", "Mi", "Gi", "Ti", "Pi", "Ei"];
const INT_FLOAT_EPS: f64 = 1e-5;

fn spec_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(\d+\.?\d*)\s*([kmgtpe]i?)[b]?\s*$").expect("static regex")
    })
}

fn zero_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^\s*0\.?0*\s*([kmgtpe]i?)?[b]?\s*$").expect("static regex"))
}

fn prefix_power(prefix: &str) -> Option<u8> {
    let lower = prefix.to_ascii_lowercase();
    for (i, p) in PREFIXES.iter().enumerate() {
        if p.to_ascii_lowercase() == lower {
            return Some(i as u8);
        }
    }
    None
}

/// Parses a human size spec such as `"10 KiB"`, `"5 MB"`, `"0"` into a byte
/// count. Binary (`Ki`/`Mi`/...) prefixes use base 1024, decimal prefixes use
/// base 1000. An unrecognized spec is an `InvalidArgument` error.
pub fn size_from_spec(spec: &str) -> Result<u64, BlockdevError> {
    if let Some(caps) = spec_regex().captures(spec) {
        let num_str = &caps[1];
        let prefix = &caps[2];
        let power = prefix_power(prefix)
            .ok_or_else(|| BlockdevError::InvalidArgument(format!("unknown size prefix: {prefix}")))?;
        let binary = prefix.to_ascii_lowercase().ends_with('i');
        let base: f64 = if binary { 1024.0 } else { 1000.0 };

        return if num_str.contains('.') {
            let fnum: f64 = num_str
                .parse()
                .map_err(|_| BlockdevError::InvalidArgument(format!("failed to parse spec: {spec}")))?;
            Ok((fnum * base.powi(power as i32)) as u64)
        } else {
            let inum: u64 = num_str
                .parse()
                .map_err(|_| BlockdevError::InvalidArgument(format!("failed to parse spec: {spec}")))?;
            Ok(inum * (base.powi(power as i32) as u64))
        };
    }

    if zero_regex().is_match(spec) {
        return Ok(0);
    }

    Err(BlockdevError::InvalidArgument(format!(
        "failed to parse spec: {spec}"
    )))
}

/// Pretty-prints a byte count, stepping up through binary prefixes while the
/// value is still `>= 1024` (with a float epsilon so near-boundary values
/// don't get divided one extra time). Exact values print without decimals;
/// everything else prints to two decimal places.
pub fn size_human_readable(size: u64) -> String {
    let mut value = size as f64;
    let mut i: usize = 0;

    while i < PREFIXES.len() - 1 && value >= 1024.0 - INT_FLOAT_EPS {
        value /= 1024.0;
        i += 1;
    }

    if (value - value.round()).abs() < INT_FLOAT_EPS {
        format!("{} {}B", value.round() as u64, PREFIXES[i])
    } else {
        format!("{:.2} {}B", value, PREFIXES[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pretty_print_s1() {
        assert_eq!(size_human_readable(16 * 1024 * 1024), "16 MiB");
        assert_eq!(size_human_readable(9 * 1024), "9 KiB");
        assert_eq!(size_human_readable(8 * 1024u64.pow(6)), "8 EiB");
        assert_eq!(size_human_readable(12 * 1024u64.pow(6)), "12 EiB");
        assert_eq!(
            size_human_readable((16.4356 * 1024f64.powi(3)) as u64),
            "16.44 GiB"
        );
    }

    #[test]
    fn parse_s2() {
        assert_eq!(size_from_spec("10 KiB").unwrap(), 10240);
        assert_eq!(size_from_spec("10 KB").unwrap(), 10000);
        assert_eq!(size_from_spec("5 MiB").unwrap(), 5242880);
        assert_eq!(size_from_spec("3.2 MiB").unwrap(), 3355443);
        assert_eq!(size_from_spec("0").unwrap(), 0);
        assert_eq!(size_from_spec("0.00").unwrap(), 0);
        assert!(size_from_spec("3 XiB").is_err());
    }

    #[test]
    fn round_trip_within_half_percent() {
        for n in [1u64, 512, 4096, 1_048_576, 3_221_225_472, 999_999_999] {
            let printed = size_human_readable(n);
            let num: f64 = printed
                .split_whitespace()
                .next()
                .unwrap()
                .parse()
                .unwrap();
            let suffix = printed.split_whitespace().nth(1).unwrap();
            let parsed = size_from_spec(&format!("{num}{suffix}")).unwrap();
            let diff = (parsed as f64 - n as f64).abs() / n as f64;
            assert!(diff < 0.005, "{n} -> {printed} -> {parsed} diff {diff}");
        }
    }
}
