use std::env;
use std::sync::OnceLock;

static BNRS_BACKEND: OnceLock<Option<String>> = OnceLock::new();

fn parse_name(value: &str) -> Option<String> {
    let normalized = value.trim().to_ascii_lowercase();
    (!normalized.is_empty()).then_some(normalized)
}

/// Backend name requested through `BNRS_BACKEND`, read once per process.
pub(crate) fn backend_override() -> Option<&'static str> {
    BNRS_BACKEND
        .get_or_init(|| env::var("BNRS_BACKEND").ok().and_then(|v| parse_name(&v)))
        .as_deref()
}

#[cfg(test)]
mod tests {
    use super::parse_name;

    #[test]
    fn blank_values_are_ignored() {
        assert_eq!(parse_name("  "), None);
        assert_eq!(parse_name(" CPU "), Some("cpu".to_string()));
    }
}
