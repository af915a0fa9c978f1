pub fn sanitize_name(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return "Player".to_string();
    }
    trimmed.chars().take(16).collect()
}

/// Wallet address when one was offered, otherwise a stable per-session
/// guest tag. The tag is minted once at join time and never changes.
pub fn resolve_identity(wallet_address: Option<&str>, guest_seq: u64) -> String {
    match wallet_address.map(str::trim) {
        Some(address) if !address.is_empty() => address.to_string(),
        _ => format!("guest_{guest_seq}"),
    }
}

pub fn normalize_room_code(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

/// Abbreviated identity for labels: `0x1234…abcd` style for addresses,
/// guest tags unchanged.
pub fn short_identity(identity: &str) -> String {
    if identity.starts_with("guest_") || identity.chars().count() <= 10 {
        return identity.to_string();
    }
    let head: String = identity.chars().take(6).collect();
    let tail: String = {
        let chars: Vec<char> = identity.chars().collect();
        chars[chars.len() - 4..].iter().collect()
    };
    format!("{head}...{tail}")
}

pub fn parse_history_limit(raw: Option<&str>) -> Option<usize> {
    raw.and_then(|value| value.parse::<usize>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_name_applies_trim_empty_and_max_len() {
        assert_eq!(sanitize_name(""), "Player");
        assert_eq!(sanitize_name("   "), "Player");
        assert_eq!(sanitize_name(" Alice "), "Alice");
        assert_eq!(sanitize_name("12345678901234567890"), "1234567890123456");
    }

    #[test]
    fn wallet_identity_wins_over_guest_tag() {
        assert_eq!(resolve_identity(Some("0xabc"), 3), "0xabc");
        assert_eq!(resolve_identity(Some("  0xabc  "), 3), "0xabc");
    }

    #[test]
    fn missing_wallet_synthesizes_guest_tag() {
        assert_eq!(resolve_identity(None, 3), "guest_3");
        assert_eq!(resolve_identity(Some(""), 7), "guest_7");
        assert_eq!(resolve_identity(Some("   "), 7), "guest_7");
    }

    #[test]
    fn room_codes_are_normalized() {
        assert_eq!(normalize_room_code(" abc123 "), "ABC123");
    }

    #[test]
    fn short_identity_abbreviates_addresses_only() {
        assert_eq!(
            short_identity("0x742d35Cc6634C0532925a3b8D4d35F4e4dF50aB6"),
            "0x742d...0aB6"
        );
        assert_eq!(short_identity("guest_12"), "guest_12");
        assert_eq!(short_identity("0xshort"), "0xshort");
    }

    #[test]
    fn history_limit_parsing_is_lenient_for_invalid_values() {
        assert_eq!(parse_history_limit(Some("8")), Some(8));
        assert_eq!(parse_history_limit(Some("abc")), None);
        assert_eq!(parse_history_limit(Some("-1")), None);
        assert_eq!(parse_history_limit(None), None);
    }
}
