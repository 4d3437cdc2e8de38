//! Byte counts in human-readable form, both directions.

const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

/// Format a byte count into IEC units (KiB, MiB, GiB, TiB) with trimmed precision.
pub fn format_bytes(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut unit_index = 0;

    while value >= 1024.0 && unit_index < UNITS.len() - 1 {
        value /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        return format!("{bytes} {}", UNITS[unit_index]);
    }

    let mut value_str = if value >= 10.0 {
        format!("{value:.1}")
    } else {
        format!("{value:.2}")
    };

    if value_str.contains('.') {
        while value_str.ends_with('0') {
            value_str.pop();
        }
        if value_str.ends_with('.') {
            value_str.pop();
        }
    }

    format!("{value_str} {}", UNITS[unit_index])
}

/// Parse a size such as `5242880`, `512 KiB`, `10MiB` or `1.5 MB`.
///
/// Decimal suffixes (`KB`, `MB`, ...) are read as their binary counterparts,
/// matching how upload limits are usually written in configuration files.
pub fn parse_bytes(input: &str) -> Option<u64> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    let split_at = trimmed
        .find(|ch: char| !(ch.is_ascii_digit() || ch == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split_at);
    if number.is_empty() {
        return None;
    }

    let exponent = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 0,
        "k" | "kb" | "kib" => 1,
        "m" | "mb" | "mib" => 2,
        "g" | "gb" | "gib" => 3,
        "t" | "tb" | "tib" => 4,
        _ => return None,
    };

    if exponent == 0 {
        return number.parse::<u64>().ok();
    }

    let value: f64 = number.parse().ok()?;
    let scaled = value * 1024f64.powi(exponent);
    if !scaled.is_finite() || scaled < 0.0 || scaled > u64::MAX as f64 {
        return None;
    }
    Some(scaled.round() as u64)
}
