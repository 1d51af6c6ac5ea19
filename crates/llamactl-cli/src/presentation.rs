//! Table formatting helpers for terminal output.

/// Truncate to `max_len` characters, ending in "..." when shortened.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{kept}...")
}

pub fn print_separator(width: usize) {
    println!("{}", "-".repeat(width));
}

/// `Some(v)` as text, `None` as `--`.
pub fn or_dash<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "--".to_string(), |v| v.to_string())
}

/// `1536` → `1.5 GiB`, small values stay in MiB.
pub fn format_mib(mib: u64) -> String {
    if mib >= 1024 {
        #[allow(clippy::cast_precision_loss)]
        let gib = mib as f64 / 1024.0;
        format!("{gib:.1} GiB")
    } else {
        format!("{mib} MiB")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_counts_characters() {
        assert_eq!(truncate("Hello", 10), "Hello");
        assert_eq!(truncate("Hello World", 8), "Hello...");
        assert_eq!(truncate("ééééé", 4), "é...");
    }

    #[test]
    fn mib_formatting() {
        assert_eq!(format_mib(512), "512 MiB");
        assert_eq!(format_mib(1536), "1.5 GiB");
        assert_eq!(or_dash(None::<u32>), "--");
        assert_eq!(or_dash(Some(3)), "3");
    }
}
