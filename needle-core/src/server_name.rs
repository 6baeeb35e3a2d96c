/// Name served to clients that send no SNI (or an empty one).
pub const DEFAULT_CERTIFICATE_NAME: &str = "default-needle-certificate";

/// Pick the certificate name for a handshake.
///
/// A present, non-empty SNI value is used verbatim. Anything else resolves to
/// `default_name`, so every SNI-less client is served the same record.
pub fn resolve_certificate_name<'a>(
    server_name: Option<&'a str>,
    default_name: &'a str,
) -> &'a str {
    match server_name {
        Some(name) if !name.is_empty() => name,
        _ => default_name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sni_is_used_verbatim() {
        assert_eq!(
            resolve_certificate_name(Some("App.Example.TEST"), DEFAULT_CERTIFICATE_NAME),
            "App.Example.TEST"
        );
    }

    #[test]
    fn missing_sni_uses_default_name() {
        assert_eq!(
            resolve_certificate_name(None, DEFAULT_CERTIFICATE_NAME),
            DEFAULT_CERTIFICATE_NAME
        );
    }

    #[test]
    fn empty_sni_uses_default_name() {
        assert_eq!(resolve_certificate_name(Some(""), "fallback.local"), "fallback.local");
    }

    #[test]
    fn ip_literal_sni_is_kept() {
        assert_eq!(
            resolve_certificate_name(Some("10.0.0.7"), DEFAULT_CERTIFICATE_NAME),
            "10.0.0.7"
        );
    }
}
