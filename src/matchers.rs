//! Primitive leaf matchers invoked by generated validators: color, MAC
//! address, IPv4/IPv6. Plain string predicates, no compilation logic.

/// Recognized color names for `$names`-enabled color checks.
const NAMED_COLORS: &[&str] = &[
    "aqua", "beige", "black", "blue", "brown", "coral", "crimson", "cyan",
    "fuchsia", "gold", "gray", "green", "grey", "indigo", "ivory", "khaki",
    "lavender", "lime", "magenta", "maroon", "navy", "olive", "orange",
    "orchid", "pink", "purple", "red", "salmon", "silver", "teal",
    "turquoise", "violet", "white", "yellow",
];

/// Name-matching table for one color node: the shared name list plus the
/// schema's extra-allowed names. Built once at normalization.
#[derive(Clone, Debug, Default)]
pub struct ColorTable {
    allow_names: bool,
    extra: Vec<String>,
}

impl ColorTable {
    pub fn new(allow_names: bool, extra: impl IntoIterator<Item = String>) -> Self {
        ColorTable {
            allow_names,
            extra: extra.into_iter().map(|s| s.to_ascii_lowercase()).collect(),
        }
    }

    pub fn is_match(&self, s: &str) -> bool {
        if is_hex_color(s) {
            return true;
        }
        let lower = s.to_ascii_lowercase();
        if self.allow_names && NAMED_COLORS.binary_search(&lower.as_str()).is_ok() {
            return true;
        }
        self.extra.iter().any(|name| *name == lower)
    }
}

/// `#rgb` or `#rrggbb`.
pub fn is_hex_color(s: &str) -> bool {
    let Some(digits) = s.strip_prefix('#') else {
        return false;
    };
    matches!(digits.len(), 3 | 6) && digits.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Six two-digit hex groups joined by `sep`.
pub fn is_mac(s: &str, sep: char) -> bool {
    let groups: Vec<&str> = s.split(sep).collect();
    groups.len() == 6
        && groups
            .iter()
            .all(|g| g.len() == 2 && g.bytes().all(|b| b.is_ascii_hexdigit()))
}

/// Dotted quad, each octet 0-255.
pub fn is_ipv4(s: &str) -> bool {
    let octets: Vec<&str> = s.split('.').collect();
    octets.len() == 4
        && octets.iter().all(|part| {
            !part.is_empty()
                && part.len() <= 3
                && part.bytes().all(|b| b.is_ascii_digit())
                && part.parse::<u32>().map(|n| n <= 255).unwrap_or(false)
        })
}

/// Colon-grouped hex with at most one `::` compression.
pub fn is_ipv6(s: &str) -> bool {
    fn groups_ok(part: &str) -> Option<usize> {
        if part.is_empty() {
            return Some(0);
        }
        let groups: Vec<&str> = part.split(':').collect();
        for g in &groups {
            if g.is_empty() || g.len() > 4 || !g.bytes().all(|b| b.is_ascii_hexdigit()) {
                return None;
            }
        }
        Some(groups.len())
    }

    match s.matches("::").count() {
        0 => groups_ok(s) == Some(8),
        1 => {
            let Some((head, tail)) = s.split_once("::") else {
                return false;
            };
            match (groups_ok(head), groups_ok(tail)) {
                // The compression stands in for at least one zero group.
                (Some(h), Some(t)) => h + t <= 7,
                _ => false,
            }
        }
        _ => false,
    }
}
