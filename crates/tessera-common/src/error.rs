//! String-type validation errors

use miette::SourceSpan;
use smol_str::SmolStr;

/// Failure to parse one of the validated string types (DID, TID, NSID, record key)
///
/// Carries the offending input as miette source code so diagnostics can point
/// at the bad span where one is known.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
#[error("error in `{source}`: {kind}")]
#[diagnostic(code(tessera::types::string))]
pub struct StrError {
    /// Which string type was being parsed
    pub spec: SmolStr,
    /// The rejected input
    #[source_code]
    pub source: String,
    /// What went wrong
    #[source]
    #[diagnostic_source]
    pub kind: StrParseKind,
}

impl StrError {
    /// Build an error for the given type name and input
    pub fn new(spec: &'static str, source: impl Into<String>, kind: StrParseKind) -> Self {
        Self {
            spec: SmolStr::new_static(spec),
            source: source.into(),
            kind,
        }
    }

    /// Input exceeded the maximum length
    pub fn too_long(spec: &'static str, source: &str, max: usize, actual: usize) -> Self {
        Self::new(spec, source, StrParseKind::TooLong { max, actual })
    }

    /// Input shorter than the minimum length
    pub fn too_short(spec: &'static str, source: &str, min: usize, actual: usize) -> Self {
        Self::new(spec, source, StrParseKind::TooShort { min, actual })
    }

    /// Input didn't match the type's grammar
    pub fn regex(spec: &'static str, source: &str, message: SmolStr) -> Self {
        Self::new(
            spec,
            source,
            StrParseKind::RegexFail {
                span: None,
                message,
            },
        )
    }

    /// A disallowed value or substring was found; the span points at the first hit
    pub fn disallowed(spec: &'static str, source: &str, disallowed: &[&str]) -> Self {
        for item in disallowed {
            if let Some(loc) = source.find(item) {
                return Self::new(
                    spec,
                    source,
                    StrParseKind::Disallowed {
                        problem: Some(SourceSpan::new(loc.into(), item.len())),
                        message: smol_str::format_smolstr!("`{item}`"),
                    },
                );
            }
        }
        Self::new(
            spec,
            source,
            StrParseKind::Disallowed {
                problem: None,
                message: SmolStr::new_static("disallowed value"),
            },
        )
    }

    /// A required separator or component is absent
    pub fn missing(spec: &'static str, source: &str, expected: &str) -> Self {
        Self::new(
            spec,
            source,
            StrParseKind::MissingComponent {
                span: None,
                message: smol_str::format_smolstr!("expected `{expected}`"),
            },
        )
    }
}

/// Specific reason a string failed validation
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum StrParseKind {
    /// Grammar mismatch
    #[error("regex failure - {message}")]
    #[diagnostic(code(tessera::types::string::regex_fail))]
    RegexFail {
        /// Offending span, when known
        #[label]
        span: Option<SourceSpan>,
        /// Description of the expected form
        #[help]
        message: SmolStr,
    },
    /// Too many characters
    #[error("string too long (allowed: {max}, actual: {actual})")]
    #[diagnostic(code(tessera::types::string::wrong_length))]
    TooLong {
        /// Maximum length
        max: usize,
        /// Actual length
        actual: usize,
    },
    /// Too few characters
    #[error("string too short (allowed: {min}, actual: {actual})")]
    #[diagnostic(code(tessera::types::string::wrong_length))]
    TooShort {
        /// Minimum length
        min: usize,
        /// Actual length
        actual: usize,
    },
    /// Contains a disallowed value
    #[error("disallowed - {message}")]
    #[diagnostic(code(tessera::types::string::disallowed))]
    Disallowed {
        /// Where the disallowed value starts
        #[label]
        problem: Option<SourceSpan>,
        /// What was found
        #[help]
        message: SmolStr,
    },
    /// A required component is missing
    #[error("missing - {message}")]
    #[diagnostic(code(tessera::types::string::missing_component))]
    MissingComponent {
        /// Where it should have been
        #[label]
        span: Option<SourceSpan>,
        /// What was expected
        #[help]
        message: SmolStr,
    },
}
