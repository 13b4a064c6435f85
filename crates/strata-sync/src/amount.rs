//! Fixed-point token amounts.
//!
//! Balances and amounts stay in integer base units end to end. Strings
//! are produced only for display, and the APY percentage is computed in
//! integer arithmetic before formatting.

/// Scale of on-chain interest rates (1e27).
pub const RAY: u128 = 1_000_000_000_000_000_000_000_000_000;

const DISPLAY_DECIMALS: u32 = 4;

/// Parse a user-entered decimal into base units.
///
/// Accepts an optional thousands separator (`,`) and surrounding
/// whitespace. Rejects signs, exponents, more fractional digits than
/// `decimals`, and values that overflow.
pub fn parse_units(input: &str, decimals: u32) -> Option<u128> {
    let cleaned: String = input.trim().chars().filter(|c| *c != ',').collect();
    let (whole, fraction) = cleaned.split_once('.').unwrap_or((cleaned.as_str(), ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if !whole.bytes().chain(fraction.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }
    if fraction.len() > decimals as usize {
        return None;
    }

    let scale = 10u128.checked_pow(decimals)?;
    let whole = if whole.is_empty() { 0 } else { whole.parse::<u128>().ok()? };
    let fraction = if fraction.is_empty() {
        0
    } else {
        let padding = 10u128.checked_pow(decimals - fraction.len() as u32)?;
        fraction.parse::<u128>().ok()?.checked_mul(padding)?
    };
    whole.checked_mul(scale)?.checked_add(fraction)
}

/// Exact decimal representation of `value` base units, trailing zeros
/// trimmed.
pub fn format_units(value: u128, decimals: u32) -> String {
    let digits = value.to_string();
    let decimals = decimals as usize;
    if decimals == 0 {
        return digits;
    }
    let padded = if digits.len() <= decimals {
        format!("{}{digits}", "0".repeat(decimals + 1 - digits.len()))
    } else {
        digits
    };
    let (whole, fraction) = padded.split_at(padded.len() - decimals);
    let fraction = fraction.trim_end_matches('0');
    if fraction.is_empty() {
        whole.to_string()
    } else {
        format!("{whole}.{fraction}")
    }
}

/// Display form: at most four fractional digits (rounded half up) and
/// thousands separators, e.g. `1,234.5678`.
pub fn format_token_amount(value: u128, decimals: u32) -> String {
    let kept = decimals.min(DISPLAY_DECIMALS);
    let rounded = match 10u128.checked_pow(decimals - kept) {
        Some(divisor) => {
            let remainder = value % divisor;
            let bump = u128::from(divisor > 1 && remainder >= divisor - remainder);
            (value / divisor).saturating_add(bump)
        }
        // Divisor beyond u128: every representable value rounds to zero.
        None => 0,
    };

    let unit = 10u128.pow(kept);
    let whole = group_thousands(&(rounded / unit).to_string());
    let fraction = format!("{:0width$}", rounded % unit, width = kept as usize);
    let fraction = fraction.trim_end_matches('0');
    if fraction.is_empty() {
        whole
    } else {
        format!("{whole}.{fraction}")
    }
}

/// Annual rate given in RAY units as a percentage with two decimals,
/// e.g. `3.25%`. Missing or zero rates display as `-`.
pub fn apy_from_ray(rate: Option<u128>) -> String {
    let rate = match rate {
        Some(rate) if rate > 0 => rate,
        _ => return "-".to_string(),
    };
    // rate / RAY * 100 with two decimals == rate / 1e23 in hundredths.
    let divisor = RAY / 10_000;
    let hundredths = rate / divisor + u128::from(rate % divisor >= divisor / 2);
    format!("{}.{:02}%", hundredths / 100, hundredths % 100)
}

/// `0x` followed by 40 hex digits.
pub fn is_valid_address(address: &str) -> bool {
    address
        .strip_prefix("0x")
        .filter(|hex_part| hex_part.len() == 40)
        .is_some_and(|hex_part| hex::decode(hex_part).is_ok())
}

fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
