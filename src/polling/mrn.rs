use crate::error::{AppError, AppResult};
use std::fmt;
use std::sync::LazyLock;

/// Two-digit year, country code, then 14 alphanumerics.
static MRN_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^\d{2}[A-Z]{2}[A-Z0-9]{14}$").expect("MRN_REGEX is a valid regex pattern")
});

/// Canonical movement reference number (trimmed, upper-cased).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Mrn(String);

impl Mrn {
    /// Canonicalize without checking the format.
    pub fn canonical(raw: &str) -> Self {
        Self(raw.trim().to_uppercase())
    }

    /// Canonicalize and require a well-formed MRN.
    pub fn parse(raw: &str) -> AppResult<Self> {
        let mrn = Self::canonical(raw);
        if !mrn.is_valid_format() {
            return Err(AppError::InvalidInput(format!("Malformed MRN: {}", raw.trim())));
        }
        Ok(mrn)
    }

    pub fn is_valid_format(&self) -> bool {
        MRN_REGEX.is_match(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Mrn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
