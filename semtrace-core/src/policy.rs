//! Policy engine (C4): decides whether to trace an action at all, and
//! whether its payload may be persisted, following the strict precedence
//! order from SPEC_FULL.md §4.4.

use crate::action::ParsedAction;
use crate::config::PolicyConfig;

/// Object types that are never allowed to have their payload stored,
/// regardless of configuration.
const CREDENTIAL_OBJECT_TYPES: &[&str] =
    &["Credential", "PasswordCredential", "Secret", "DigitalDocument"];

/// Sentinel stored in the locator column when payload storage is forbidden.
pub const REDACTION_SENTINEL: &str = "[REDACTED - Credential payload not stored]";

/// Outcome of the policy engine for one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyDecision {
    pub should_trace: bool,
    pub should_store_payload: bool,
}

/// Evaluate the policy engine for a parsed action.
pub fn evaluate(action: &ParsedAction, config: &PolicyConfig) -> PolicyDecision {
    // 1. Credential safety is unconditional.
    let mut should_store_payload = !CREDENTIAL_OBJECT_TYPES.contains(&action.object_type.as_str());

    // 2. Per-action opt-out short-circuits everything else.
    if !action.trace {
        return PolicyDecision { should_trace: false, should_store_payload: false };
    }

    // 3. Per-action payload opt-out.
    if !action.trace_payload {
        should_store_payload = false;
    }

    // 4. Config exclusion lists.
    let excluded = config.exclude_action_types.iter().any(|t| t == &action.action_type)
        || config.exclude_object_types.iter().any(|t| t == &action.object_type);
    if excluded {
        return PolicyDecision { should_trace: false, should_store_payload: false };
    }

    // 5. Config-level payload gate (only relevant if nothing above already
    // forbade storage).
    if !config.store_payloads {
        should_store_payload = false;
    }

    PolicyDecision { should_trace: true, should_store_payload }
}
