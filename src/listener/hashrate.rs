//! Hashrate strings as miners report them, e.g. `"1.02MH/s"` or `"512 KH/s"`.

const UNITS: [&str; 7] = ["", "K", "M", "G", "T", "P", "E"];

/// Parses a reported hashrate into hashes per second.
pub fn parse_hashrate(raw: &str) -> Option<f64> {
    let text = raw.trim();
    let text = text
        .strip_suffix("H/s")
        .or_else(|| text.strip_suffix("h/s"))
        .unwrap_or(text)
        .trim_end();

    let (number, prefix) = match text.char_indices().last() {
        Some((index, unit)) if unit.is_ascii_alphabetic() => (&text[..index], unit.to_ascii_uppercase()),
        _ => (text, ' '),
    };

    let exponent = match prefix {
        ' ' => 0,
        unit => UNITS.iter().position(|u| u.starts_with(unit) && !u.is_empty())?,
    };

    let value = number.trim().parse::<f64>().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some(value * 1000f64.powi(exponent as i32))
}

/// Formats hashes per second with the largest unit keeping the value at or
/// above one, two decimals.
pub fn format_hashrate(hashes_per_second: f64) -> String {
    let mut value = hashes_per_second.max(0.0);
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    format!("{value:.2}{}H/s", UNITS[unit])
}
