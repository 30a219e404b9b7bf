//! Declarative challenge descriptions exchanged with the transport layer.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use utoipa::ToSchema;

/// Component for the terminal redirect pseudo-challenge.
pub const COMPONENT_REDIRECT: &str = "pg-flow-redirect";
/// Component shown when access is refused or a stage degraded.
pub const COMPONENT_ACCESS_DENIED: &str = "pg-stage-access-denied";
/// Key for errors that do not belong to a single field.
pub const NON_FIELD_ERRORS: &str = "non_field_errors";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Password,
    Hidden,
}

/// One input the stage needs from the user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ChallengeField {
    pub name: String,
    pub kind: FieldKind,
    pub label: String,
    pub required: bool,
}

impl ChallengeField {
    #[must_use]
    pub fn text(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Text,
            label: label.into(),
            required: true,
        }
    }

    #[must_use]
    pub fn password(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Password,
            label: label.into(),
            required: true,
        }
    }
}

/// Error detail attached to a field of a re-issued challenge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    pub string: String,
    pub code: String,
}

impl ErrorDetail {
    #[must_use]
    pub fn new(string: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            string: string.into(),
            code: code.into(),
        }
    }

    #[must_use]
    pub fn invalid(string: impl Into<String>) -> Self {
        Self::new(string, "invalid")
    }

    #[must_use]
    pub fn required() -> Self {
        Self::new("This field is required.", "required")
    }
}

/// Declarative description of the input a stage needs, rendered by the
/// transport layer. Serializable as-is.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Challenge {
    pub component: String,
    pub title: Option<String>,
    pub fields: Vec<ChallengeField>,
    /// Field-level errors from the previous response, keyed by field name.
    pub response_errors: BTreeMap<String, Vec<ErrorDetail>>,
    /// Arbitrary display metadata for the frontend.
    #[schema(value_type = Object)]
    pub metadata: Value,
}

impl Challenge {
    #[must_use]
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            title: None,
            fields: Vec::new(),
            response_errors: BTreeMap::new(),
            metadata: Value::Null,
        }
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    #[must_use]
    pub fn with_field(mut self, field: ChallengeField) -> Self {
        self.fields.push(field);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Terminal redirect, expressed as a challenge so the transport layer has
    /// a single payload shape.
    #[must_use]
    pub fn redirect(to: impl Into<String>) -> Self {
        Self::new(COMPONENT_REDIRECT).with_metadata(json!({ "to": to.into() }))
    }

    #[must_use]
    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::new(COMPONENT_ACCESS_DENIED).with_metadata(json!({ "error_message": message.into() }))
    }

    pub fn add_error(&mut self, field: impl Into<String>, error: ErrorDetail) {
        self.response_errors.entry(field.into()).or_default().push(error);
    }

    #[must_use]
    pub fn with_response_errors(mut self, errors: BTreeMap<String, Vec<ErrorDetail>>) -> Self {
        self.response_errors = errors;
        self
    }

    #[must_use]
    pub fn is_redirect(&self) -> bool {
        self.component == COMPONENT_REDIRECT
    }
}

/// Verdict of a stage validator over submitted data.
#[derive(Clone, Debug, PartialEq)]
pub enum ValidationOutcome {
    /// Response accepted; the updates are merged into the plan context.
    Accepted {
        context_updates: BTreeMap<String, Value>,
    },
    /// Response rejected with field-level detail.
    Rejected {
        field_errors: BTreeMap<String, Vec<ErrorDetail>>,
    },
}

impl ValidationOutcome {
    #[must_use]
    pub fn accepted() -> Self {
        Self::Accepted {
            context_updates: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn rejected(field: impl Into<String>, error: ErrorDetail) -> Self {
        let mut field_errors = BTreeMap::new();
        field_errors.insert(field.into(), vec![error]);
        Self::Rejected { field_errors }
    }

    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_challenge_carries_target() {
        let challenge = Challenge::redirect("/accounts");
        assert!(challenge.is_redirect());
        assert_eq!(challenge.metadata["to"], "/accounts");
    }

    #[test]
    fn access_denied_carries_message() {
        let challenge = Challenge::access_denied("Access denied");
        assert_eq!(challenge.component, COMPONENT_ACCESS_DENIED);
        assert_eq!(challenge.metadata["error_message"], "Access denied");
    }

    #[test]
    fn errors_accumulate_per_field() {
        let mut challenge = Challenge::new("pg-stage-password")
            .with_field(ChallengeField::password("password", "Password"));
        challenge.add_error("password", ErrorDetail::required());
        challenge.add_error("password", ErrorDetail::invalid("Invalid password"));
        assert_eq!(challenge.response_errors["password"].len(), 2);
        assert_eq!(challenge.response_errors["password"][0].code, "required");
    }

    #[test]
    fn challenge_serializes_for_the_wire() {
        let challenge = Challenge::new("pg-stage-identification")
            .with_title("Welcome")
            .with_field(ChallengeField::text("uid_field", "Username or email"));
        let value = serde_json::to_value(&challenge).unwrap();
        assert_eq!(value["component"], "pg-stage-identification");
        assert_eq!(value["fields"][0]["kind"], "text");
        let parsed: Challenge = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, challenge);
    }

    #[test]
    fn rejected_outcome_is_not_accepted() {
        let outcome = ValidationOutcome::rejected("uid_field", ErrorDetail::required());
        assert!(!outcome.is_accepted());
        assert!(ValidationOutcome::accepted().is_accepted());
    }
}
