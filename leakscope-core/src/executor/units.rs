//! Parsing of the human-readable sizes printed by `docker stats`.

use crate::error::LeakError;

const MIB: f64 = 1024.0 * 1024.0;

fn unit_multiplier(unit: &str) -> Option<f64> {
    Some(match unit {
        "B" => 1.0,
        "kB" | "KB" => 1e3,
        "MB" => 1e6,
        "GB" => 1e9,
        "TB" => 1e12,
        "KiB" => 1024.0,
        "MiB" => MIB,
        "GiB" => MIB * 1024.0,
        "TiB" => MIB * 1024.0 * 1024.0,
        _ => return None,
    })
}

/// Parse a size such as `123.4MiB` or `1.2kB` into bytes.
pub fn parse_size_to_bytes(s: &str) -> Result<f64, LeakError> {
    let s = s.trim();
    if s == "0" || s == "0B" {
        return Ok(0.0);
    }
    let split = s
        .find(|c: char| c.is_ascii_alphabetic())
        .ok_or_else(|| LeakError::invalid_input(format!("cannot parse size '{s}'")))?;
    let (number, unit) = s.split_at(split);
    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| LeakError::invalid_input(format!("cannot parse size '{s}'")))?;
    let mult = unit_multiplier(unit.trim())
        .ok_or_else(|| LeakError::invalid_input(format!("unknown unit '{unit}' in '{s}'")))?;
    Ok(value * mult)
}

/// `"123.4MiB / 512MiB"` -> bytes used.
pub fn parse_mem_usage(field: &str) -> Result<f64, LeakError> {
    let used = field.split('/').next().unwrap_or_default();
    parse_size_to_bytes(used)
}

/// `"1.2MB / 3.4MB"` -> (read bytes, written bytes).
pub fn parse_block_io(field: &str) -> Result<(f64, f64), LeakError> {
    let mut parts = field.split('/');
    match (parts.next(), parts.next()) {
        (Some(read), Some(write)) => Ok((parse_size_to_bytes(read)?, parse_size_to_bytes(write)?)),
        _ => Err(LeakError::invalid_input(format!(
            "cannot parse block I/O '{field}'"
        ))),
    }
}

/// `"87.5%"` -> 87.5. Empty strings read as zero.
pub fn parse_percent(field: &str) -> Result<f64, LeakError> {
    let trimmed = field.trim().trim_end_matches('%');
    if trimmed.is_empty() {
        return Ok(0.0);
    }
    trimmed
        .parse()
        .map_err(|_| LeakError::invalid_input(format!("cannot parse percent '{field}'")))
}

pub fn bytes_to_mib(bytes: f64) -> f64 {
    bytes / MIB
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_binary_and_decimal_units() {
        assert_eq!(parse_size_to_bytes("1KiB").unwrap(), 1024.0);
        assert_eq!(parse_size_to_bytes("1.5MB").unwrap(), 1_500_000.0);
        assert_eq!(parse_size_to_bytes("2kB").unwrap(), 2000.0);
        assert_eq!(parse_size_to_bytes("0B").unwrap(), 0.0);
        assert_eq!(parse_size_to_bytes("0").unwrap(), 0.0);
    }

    #[test]
    fn test_parse_rejects_unknown_unit() {
        assert!(parse_size_to_bytes("12XB").is_err());
        assert!(parse_size_to_bytes("MiB").is_err());
        assert!(parse_size_to_bytes("12").is_err());
    }

    #[test]
    fn test_parse_docker_stats_fields() {
        assert_eq!(parse_mem_usage("64MiB / 512MiB").unwrap(), 64.0 * MIB);
        let (r, w) = parse_block_io("1.2MB / 3.4MB").unwrap();
        assert_eq!(r, 1_200_000.0);
        assert_eq!(w, 3_400_000.0);
        assert_eq!(parse_percent("99.87%").unwrap(), 99.87);
        assert_eq!(parse_percent("--").ok(), None);
    }
}
