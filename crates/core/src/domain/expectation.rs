// Expectation Table
// Which stderr text counts as success for a zero exit code, per action

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

/// Default table, built once on first use
pub static EXPECTATIONS: Lazy<ExpectationTable> = Lazy::new(ExpectationTable::standard);

const STANDARD_PATTERNS: &[(&str, &str)] = &[
    ("cms.verify", "^verification successful"),
    ("genrsa", "^generating"),
    ("pkcs12", "^mac verified ok"),
    ("pkcs12.export", "^$"),
    ("req.new", "^generating"),
    ("req.verify", "^verify ok"),
    ("rsa", "^writing rsa key"),
    ("smime.verify", "^verification successful"),
    ("x509.req", "^signature ok"),
];

/// Immutable action -> case-insensitive stderr pattern mapping
#[derive(Debug, Clone)]
pub struct ExpectationTable {
    entries: Vec<(&'static str, Regex)>,
}

impl ExpectationTable {
    fn standard() -> Self {
        let entries = STANDARD_PATTERNS
            .iter()
            .map(|(action, pattern)| {
                let regex = RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .expect("built-in expectation pattern must compile");
                (*action, regex)
            })
            .collect();
        Self { entries }
    }

    pub fn get(&self, action: &str) -> Option<&Regex> {
        self.entries
            .iter()
            .find(|(a, _)| *a == action)
            .map(|(_, regex)| regex)
    }

    /// True only when the action has a pattern and `stderr` matches it
    pub fn accepts(&self, action: &str, stderr: &str) -> bool {
        self.get(action).is_some_and(|regex| regex.is_match(stderr))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Regex)> {
        self.entries.iter().map(|(a, r)| (*a, r))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_table_entries() {
        assert_eq!(EXPECTATIONS.len(), 9);
        assert!(EXPECTATIONS.get("req.verify").is_some());
        assert!(EXPECTATIONS.get("x509").is_none());
    }

    #[test]
    fn test_case_insensitive_prefix_match() {
        assert!(EXPECTATIONS.accepts("req.verify", "verify OK\n"));
        assert!(EXPECTATIONS.accepts("req.verify", "VERIFY ok"));
        assert!(EXPECTATIONS.accepts("rsa", "writing RSA key\n"));
        assert!(EXPECTATIONS.accepts("x509.req", "Signature ok\nsubject=CN = test\n"));
    }

    #[test]
    fn test_every_entry_accepts_its_openssl_message() {
        let samples = [
            ("cms.verify", "Verification successful\n"),
            ("genrsa", "Generating RSA private key, 2048 bit long modulus (2 primes)\n"),
            ("pkcs12", "MAC verified OK\n"),
            ("pkcs12.export", ""),
            ("req.new", "Generating a RSA private key\n"),
            ("req.verify", "verify OK\n"),
            ("rsa", "writing RSA key\n"),
            ("smime.verify", "Verification successful\n"),
            ("x509.req", "Signature ok\n"),
        ];

        assert_eq!(samples.len(), EXPECTATIONS.len());
        for (action, stderr) in samples {
            assert!(EXPECTATIONS.accepts(action, stderr), "{action} rejected {stderr:?}");
        }
    }

    #[test]
    fn test_verify_failures_rejected() {
        assert!(!EXPECTATIONS.accepts("cms.verify", "Verification failure\n"));
        assert!(!EXPECTATIONS.accepts("smime.verify", "Verification failure\n"));
        assert!(!EXPECTATIONS.accepts("pkcs12", "Mac verify error: invalid password?\n"));
        assert!(!EXPECTATIONS.accepts("genrsa", "genrsa: Can't open \"out\" for writing\n"));
    }

    #[test]
    fn test_anchored_at_start() {
        assert!(!EXPECTATIONS.accepts("req.verify", "warning\nverify OK\n"));
        assert!(!EXPECTATIONS.accepts("genrsa", " Generating RSA private key"));
    }

    #[test]
    fn test_export_requires_empty_stderr() {
        assert!(EXPECTATIONS.accepts("pkcs12.export", ""));
        assert!(!EXPECTATIONS.accepts("pkcs12.export", "\n"));
        assert!(!EXPECTATIONS.accepts("pkcs12.export", "Enter Export Password:"));
    }

    #[test]
    fn test_unknown_action_never_accepted() {
        assert!(!EXPECTATIONS.accepts("version", ""));
        assert!(!EXPECTATIONS.accepts("x509", "anything"));
    }
}
