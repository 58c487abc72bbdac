//! Kubernetes resource quantity parsing.
//!
//! The API serialises quantities as strings (`250m`, `128Mi`, `2`); the
//! dashboard only ever needs CPU as millicores and memory as bytes.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

/// Parses a quantity into `(mantissa, multiplier)` where the value is
/// `mantissa * multiplier` in base units.
fn parse(raw: &str) -> Option<(f64, f64)> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    // Binary suffixes first so `Mi` is not mistaken for `M` + trailing junk.
    const SUFFIXES: &[(&str, f64)] = &[
        ("Ki", 1024.0),
        ("Mi", 1048576.0),
        ("Gi", 1073741824.0),
        ("Ti", 1099511627776.0),
        ("Pi", 1125899906842624.0),
        ("Ei", 1152921504606846976.0),
        ("n", 1e-9),
        ("u", 1e-6),
        ("m", 1e-3),
        ("k", 1e3),
        ("M", 1e6),
        ("G", 1e9),
        ("T", 1e12),
        ("P", 1e15),
        ("E", 1e18),
    ];
    for (suffix, multiplier) in SUFFIXES {
        if let Some(num) = raw.strip_suffix(suffix) {
            return num.parse().ok().map(|mantissa| (mantissa, *multiplier));
        }
    }
    // No unit suffix; plain or exponent notation.
    raw.parse().ok().map(|mantissa| (mantissa, 1.0))
}

/// CPU quantity in millicores, e.g. `250m` → 250, `2` → 2000.
pub fn cpu_millis(q: &Quantity) -> Option<u64> {
    let (mantissa, multiplier) = parse(&q.0)?;
    let millis = mantissa * multiplier * 1e3;
    if millis < 0.0 {
        return None;
    }
    Some(millis.round() as u64)
}

/// Memory quantity in bytes, e.g. `128Mi` → 134217728.
pub fn memory_bytes(q: &Quantity) -> Option<u64> {
    let (mantissa, multiplier) = parse(&q.0)?;
    let bytes = mantissa * multiplier;
    if bytes < 0.0 {
        return None;
    }
    Some(bytes.round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(s: &str) -> Quantity {
        Quantity(s.to_string())
    }

    #[test]
    fn cpu_quantities() {
        assert_eq!(cpu_millis(&q("250m")), Some(250));
        assert_eq!(cpu_millis(&q("2")), Some(2000));
        assert_eq!(cpu_millis(&q("1.5")), Some(1500));
        assert_eq!(cpu_millis(&q("250000000n")), Some(250));
        assert_eq!(cpu_millis(&q("500u")), Some(1));
        assert_eq!(cpu_millis(&q("")), None);
        assert_eq!(cpu_millis(&q("bogus")), None);
    }

    #[test]
    fn memory_quantities() {
        assert_eq!(memory_bytes(&q("128Mi")), Some(128 * 1024 * 1024));
        assert_eq!(memory_bytes(&q("1Gi")), Some(1024 * 1024 * 1024));
        assert_eq!(memory_bytes(&q("1000k")), Some(1_000_000));
        assert_eq!(memory_bytes(&q("123456")), Some(123_456));
        assert_eq!(memory_bytes(&q("12Qi")), None);
    }

    #[test]
    fn negative_quantities_are_rejected() {
        assert_eq!(cpu_millis(&q("-1")), None);
        assert_eq!(memory_bytes(&q("-5Mi")), None);
    }
}
