//! PII detection and redaction (C3).
//!
//! A configurable catalog of regex patterns scans request/response bodies
//! for personally identifiable information. Detection is a pure function
//! over a string; redaction replaces high-confidence matches with a fixed
//! sentinel so the original value never reaches the relational or
//! object-store writers.

use regex::Regex;
use std::sync::LazyLock;

/// Where a detection was found relative to the traced action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PiiLocation {
    Request,
    Response,
    Metadata,
}

impl PiiLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
            Self::Metadata => "metadata",
        }
    }
}

/// One instance of a detected PII pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct PiiDetection {
    pub location: PiiLocation,
    pub pii_type: &'static str,
    pub pattern_matched: String,
    pub confidence: f32,
}

/// Redaction threshold: matches at or above this confidence are replaced.
pub const REDACTION_CONFIDENCE_THRESHOLD: f32 = 0.85;

struct PiiPattern {
    pii_type: &'static str,
    regex: Regex,
    confidence: f32,
}

static CATALOG: LazyLock<Vec<PiiPattern>> = LazyLock::new(|| {
    vec![
        PiiPattern {
            pii_type: "email",
            regex: Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap(),
            confidence: 0.95,
        },
        PiiPattern {
            pii_type: "ssn",
            regex: Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap(),
            confidence: 0.9,
        },
        PiiPattern {
            pii_type: "credit_card",
            regex: Regex::new(r"\b(?:\d[ -]?){13,16}\b").unwrap(),
            confidence: 0.88,
        },
        PiiPattern {
            pii_type: "phone",
            regex: Regex::new(r"\b(?:\+?1[-. ]?)?\(?\d{3}\)?[-. ]?\d{3}[-. ]?\d{4}\b").unwrap(),
            confidence: 0.75,
        },
        PiiPattern {
            pii_type: "ip_address",
            regex: Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").unwrap(),
            confidence: 0.6,
        },
        PiiPattern {
            pii_type: "iban",
            regex: Regex::new(r"\b[A-Z]{2}\d{2}[A-Z0-9]{10,30}\b").unwrap(),
            confidence: 0.85,
        },
        PiiPattern {
            pii_type: "passport",
            regex: Regex::new(r"\b[A-Z]{1,2}\d{6,9}\b").unwrap(),
            confidence: 0.5,
        },
    ]
});

/// Scan a string for PII, returning every match found by every catalog
/// entry. A single substring may produce more than one detection if
/// multiple patterns match overlapping or distinct spans.
pub fn detect(text: &str, location: PiiLocation) -> Vec<PiiDetection> {
    CATALOG
        .iter()
        .flat_map(|pattern| {
            pattern.regex.find_iter(text).map(move |m| PiiDetection {
                location,
                pii_type: pattern.pii_type,
                pattern_matched: m.as_str().to_string(),
                confidence: pattern.confidence,
            })
        })
        .collect()
}

/// Replace every detection at or above [`REDACTION_CONFIDENCE_THRESHOLD`]
/// with `[REDACTED_<TYPE>]`, returning the redacted text. Detections below
/// the threshold are recorded (by the caller) but left in place.
pub fn redact(text: &str, detections: &[PiiDetection]) -> String {
    let mut spans: Vec<(&str, &str)> = detections
        .iter()
        .filter(|d| d.confidence >= REDACTION_CONFIDENCE_THRESHOLD)
        .map(|d| (d.pattern_matched.as_str(), d.pii_type))
        .collect();
    // Longest match first so overlapping/nested patterns don't leave partial
    // residue after an earlier, shorter replacement.
    spans.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    let mut out = text.to_string();
    for (matched, pii_type) in spans {
        let sentinel = format!("[REDACTED_{}]", pii_type.to_uppercase());
        out = out.replace(matched, &sentinel);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_email() {
        let detections = detect("contact me at alice@example.com please", PiiLocation::Request);
        assert!(detections.iter().any(|d| d.pii_type == "email"));
    }

    #[test]
    fn detects_ssn() {
        let detections = detect("ssn: 123-45-6789", PiiLocation::Response);
        assert!(detections.iter().any(|d| d.pii_type == "ssn"));
    }

    #[test]
    fn no_detections_on_clean_text() {
        let detections = detect("hello world, nothing sensitive here", PiiLocation::Request);
        assert!(detections.is_empty());
    }

    #[test]
    fn redact_replaces_high_confidence_matches() {
        let text = "email alice@example.com for details";
        let detections = detect(text, PiiLocation::Request);
        let redacted = redact(text, &detections);
        assert!(redacted.contains("[REDACTED_EMAIL]"));
        assert!(!redacted.contains("alice@example.com"));
    }

    #[test]
    fn redact_leaves_low_confidence_matches_untouched() {
        let text = "passport AB1234567 on file";
        let detections = vec![PiiDetection {
            location: PiiLocation::Request,
            pii_type: "passport",
            pattern_matched: "AB1234567".to_string(),
            confidence: 0.5,
        }];
        let redacted = redact(text, &detections);
        assert_eq!(redacted, text);
    }

    #[test]
    fn location_as_str_matches_field_name() {
        assert_eq!(PiiLocation::Request.as_str(), "request");
        assert_eq!(PiiLocation::Response.as_str(), "response");
        assert_eq!(PiiLocation::Metadata.as_str(), "metadata");
    }
}
