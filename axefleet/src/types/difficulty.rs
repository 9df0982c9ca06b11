//! Magnitude-suffixed difficulty strings.
//!
//! Miner firmware reports best-share difficulty as a human-readable
//! string like `"8.52G"` or `"189M"`. Fleet-wide comparison needs the
//! numeric value back.

/// Parse a difficulty string with an optional K/M/G/T/P suffix.
///
/// Returns `None` for empty or unparseable input. Bare numbers parse
/// as-is; whitespace between number and suffix is tolerated.
pub fn parse_magnitude(value: &str) -> Option<f64> {
    let s = value.trim();
    if s.is_empty() {
        return None;
    }

    let (digits, multiplier) = match s.chars().last()? {
        'K' | 'k' => (&s[..s.len() - 1], 1e3),
        'M' | 'm' => (&s[..s.len() - 1], 1e6),
        'G' | 'g' => (&s[..s.len() - 1], 1e9),
        'T' | 't' => (&s[..s.len() - 1], 1e12),
        'P' | 'p' => (&s[..s.len() - 1], 1e15),
        _ => (s, 1.0),
    };

    let number: f64 = digits.trim().parse().ok()?;
    Some(number * multiplier)
}
