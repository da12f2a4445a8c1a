//! Action-document parsing (C2).
//!
//! Extracts the handful of fields the rest of the pipeline needs from a
//! JSON-LD action body, tolerating bodies that are not valid JSON at all —
//! a parse failure yields defaults rather than an error, so a non-JSON
//! request to a traced endpoint never breaks tracing.

use serde_json::Value;

/// Fields pulled out of an action document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAction {
    pub action_type: String,
    pub object_type: String,
    pub trace: bool,
    pub trace_payload: bool,
    pub data_subject_id: Option<String>,
}

impl Default for ParsedAction {
    fn default() -> Self {
        Self {
            action_type: "Unknown".to_string(),
            object_type: "Unknown".to_string(),
            trace: true,
            trace_payload: true,
            data_subject_id: None,
        }
    }
}

const DATA_SUBJECT_PATHS: &[&[&str]] = &[
    &["dataSubject", "identifier"],
    &["meta", "dataSubjectId"],
    &["agent", "identifier"],
    &["participant", "identifier"],
    &["customer", "identifier"],
];

fn dig<'a>(root: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(root, |v, key| v.get(key))
}

fn str_at<'a>(root: &'a Value, path: &[&str]) -> Option<&'a str> {
    dig(root, path).and_then(Value::as_str)
}

fn bool_at(root: &Value, path: &[&str]) -> Option<bool> {
    dig(root, path).and_then(Value::as_bool)
}

/// Parse a request body into its action fields. Never fails: a body that is
/// not a JSON object yields [`ParsedAction::default`].
pub fn parse_action(body: &[u8]) -> ParsedAction {
    let Ok(value) = serde_json::from_slice::<Value>(body) else {
        return ParsedAction::default();
    };
    if !value.is_object() {
        return ParsedAction::default();
    }

    let action_type = str_at(&value, &["@type"]).unwrap_or("Unknown").to_string();
    let object_type = str_at(&value, &["object", "@type"]).unwrap_or("Unknown").to_string();
    let trace = bool_at(&value, &["meta", "trace"]).unwrap_or(true);
    let trace_payload = bool_at(&value, &["meta", "tracePayload"]).unwrap_or(true);

    let data_subject_id = DATA_SUBJECT_PATHS
        .iter()
        .find_map(|path| str_at(&value, path))
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    ParsedAction { action_type, object_type, trace, trace_payload, data_subject_id }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_json_body_yields_defaults() {
        let parsed = parse_action(b"not json at all");
        assert_eq!(parsed, ParsedAction::default());
    }

    #[test]
    fn extracts_type_and_object_type() {
        let body = br#"{"@type":"CreateAction","object":{"@type":"SoftwareApplication"}}"#;
        let parsed = parse_action(body);
        assert_eq!(parsed.action_type, "CreateAction");
        assert_eq!(parsed.object_type, "SoftwareApplication");
        assert!(parsed.trace);
        assert!(parsed.trace_payload);
    }

    #[test]
    fn missing_type_fields_default_to_unknown() {
        let parsed = parse_action(br#"{"foo":"bar"}"#);
        assert_eq!(parsed.action_type, "Unknown");
        assert_eq!(parsed.object_type, "Unknown");
    }

    #[test]
    fn respects_per_action_trace_opt_out() {
        let body = br#"{"@type":"DeleteAction","meta":{"trace":false}}"#;
        let parsed = parse_action(body);
        assert!(!parsed.trace);
    }

    #[test]
    fn respects_per_action_payload_opt_out() {
        let body = br#"{"@type":"UpdateAction","meta":{"tracePayload":false}}"#;
        let parsed = parse_action(body);
        assert!(parsed.trace);
        assert!(!parsed.trace_payload);
    }

    #[test]
    fn data_subject_precedence_prefers_data_subject_identifier() {
        let body = br#"{
            "@type":"CreateAction",
            "dataSubject":{"identifier":"subj-1"},
            "agent":{"identifier":"subj-2"}
        }"#;
        let parsed = parse_action(body);
        assert_eq!(parsed.data_subject_id.as_deref(), Some("subj-1"));
    }

    #[test]
    fn data_subject_falls_back_through_precedence_chain() {
        let body = br#"{"@type":"CreateAction","customer":{"identifier":"cust-9"}}"#;
        let parsed = parse_action(body);
        assert_eq!(parsed.data_subject_id.as_deref(), Some("cust-9"));
    }

    #[test]
    fn empty_identifier_is_treated_as_absent() {
        let body = br#"{"@type":"CreateAction","dataSubject":{"identifier":""}}"#;
        let parsed = parse_action(body);
        assert_eq!(parsed.data_subject_id, None);
    }

    #[test]
    fn array_body_yields_defaults() {
        let parsed = parse_action(b"[1,2,3]");
        assert_eq!(parsed, ParsedAction::default());
    }
}
