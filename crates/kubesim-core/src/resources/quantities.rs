use crate::error::{CoreError, Result};

/// Milli-units per whole unit
pub const MILLI: i64 = 1000;

/// Multiplier (in milli-units) for a Kubernetes quantity suffix
fn suffix_multiplier(suffix: &str) -> Option<i128> {
    let milli = MILLI as i128;
    let multiplier = match suffix {
        "m" => 1,
        "" => milli,
        "k" => milli * 1_000,
        "M" => milli * 1_000_000,
        "G" => milli * 1_000_000_000,
        "T" => milli * 1_000_000_000_000,
        "P" => milli * 1_000_000_000_000_000,
        "E" => milli * 1_000_000_000_000_000_000,
        "Ki" => milli * (1 << 10),
        "Mi" => milli * (1 << 20),
        "Gi" => milli * (1 << 30),
        "Ti" => milli * (1 << 40),
        "Pi" => milli * (1 << 50),
        "Ei" => milli * (1 << 60),
        _ => return None,
    };
    Some(multiplier)
}

/// Parse a Kubernetes quantity (e.g. "2", "500m", "0.5", "128Mi", "1Gi")
/// into milli-units.
pub fn parse_quantity(s: &str) -> Result<i64> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(CoreError::invalid_quantity(s, "empty quantity"));
    }

    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+'))
        .unwrap_or(trimmed.len());
    let (number, suffix) = trimmed.split_at(split);

    let multiplier = suffix_multiplier(suffix)
        .ok_or_else(|| CoreError::invalid_quantity(s, format!("unknown suffix '{}'", suffix)))?;

    let value = if number.contains('.') {
        let parsed = number
            .parse::<f64>()
            .map_err(|e| CoreError::invalid_quantity(s, e.to_string()))?;
        (parsed * multiplier as f64).round() as i128
    } else {
        let parsed = number
            .parse::<i128>()
            .map_err(|e| CoreError::invalid_quantity(s, e.to_string()))?;
        parsed
            .checked_mul(multiplier)
            .ok_or_else(|| CoreError::invalid_quantity(s, "quantity overflows"))?
    };

    i64::try_from(value).map_err(|_| CoreError::invalid_quantity(s, "quantity overflows"))
}

/// Format milli-units as the shortest exact Kubernetes quantity string.
///
/// Whole values print without a suffix: 4000 -> "4", 1500 -> "1500m".
pub fn format_quantity(milli: i64) -> String {
    if milli % MILLI == 0 {
        format!("{}", milli / MILLI)
    } else {
        format!("{}m", milli)
    }
}
