//! Human-readable byte sizes for `--chunk-size`.

/// Parse `"50MB"`, `"1.5 GB"`, `"512K"` or a plain byte count.
///
/// Units are binary multiples: `KB`, `KiB` and `K` all mean 1024 bytes.
pub fn parse_size(input: &str) -> Result<u64, String> {
    let s = input.trim();
    if let Ok(n) = s.parse::<u64>() {
        return Ok(n);
    }

    let split = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .ok_or_else(|| format!("invalid size: `{input}`"))?;
    let (number, unit) = s.split_at(split);
    let number: f64 = number
        .parse()
        .map_err(|_| format!("invalid number in size: `{input}`"))?;

    let multiplier: u64 = match unit.trim().to_ascii_uppercase().as_str() {
        "B" => 1,
        "K" | "KB" | "KIB" => 1024,
        "M" | "MB" | "MIB" => 1024 * 1024,
        "G" | "GB" | "GIB" => 1024 * 1024 * 1024,
        other => {
            return Err(format!(
                "unknown size unit `{other}`, expected one of B, KB, MB, GB"
            ));
        }
    };

    let bytes = number * multiplier as f64;
    if !bytes.is_finite() || bytes < 1.0 {
        return Err(format!("size must be at least one byte: `{input}`"));
    }
    Ok(bytes as u64)
}

/// Format `bytes` with the largest binary unit that keeps the value >= 1.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
