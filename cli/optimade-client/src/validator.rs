//! Classify response envelopes and the resources they contain.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::error::{InputError, ResourceShapeError};
use crate::types::{ResponseEnvelope, Structure};

/// Properties a structure is labelled by, in order of preference.
///
/// A structure needs at least one of them to be displayed or converted.
pub const FORMULA_PROPERTIES: [&str; 4] = [
    "chemical_formula_descriptive",
    "chemical_formula_reduced",
    "chemical_formula_hill",
    "chemical_formula_anonymous",
];

/// How a caller should treat the errors of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// No errors were reported.
    None,
    /// The request failed, but the target stays usable.
    Recoverable,
    /// The target should not be queried again this session.
    Disqualifying,
}

/// Extract a human readable message and the HTTP statuses from `envelope`.
///
/// Returns an empty message and no statuses if the response has no errors.
/// Fails if the response has neither `data` nor `errors`.
/// Partial `data` next to `errors` is left untouched for the caller.
pub fn handle_errors(envelope: &ResponseEnvelope) -> Result<(String, BTreeSet<u16>), InputError> {
    if envelope.data.is_none() && envelope.errors.is_none() {
        return Err(InputError {
            response: serde_json::to_string(envelope).unwrap_or_default(),
        });
    }

    let Some(errors) = &envelope.errors else {
        return Ok((String::new(), BTreeSet::new()));
    };

    debug!(
        response = %serde_json::to_string_pretty(envelope).unwrap_or_default(),
        "errored response"
    );

    let details = errors
        .iter()
        .filter_map(|error| error.detail.as_deref())
        .collect::<Vec<_>>();

    let message = if envelope.data.is_some() {
        format!(
            "Error(s) during querying, but {} structures found.",
            envelope.resources().len()
        )
    } else if !details.is_empty() {
        format!(
            "Error(s) during querying. Message(s) from server:\n - {}",
            details.join("\n - ")
        )
    } else {
        "Error during querying, please try again later.".to_string()
    };

    let statuses = errors.iter().map(|error| error.status_code()).collect();

    Ok((message, statuses))
}

/// Decide what the statuses of a failed response mean for its target.
///
/// A 404 from an `optional` endpoint (e.g. `/links`) only means the endpoint
/// is not implemented.
pub fn classify(statuses: &BTreeSet<u16>, optional: bool) -> Severity {
    if statuses.is_empty() {
        Severity::None
    } else if optional && statuses.iter().all(|status| *status == 404) {
        Severity::Recoverable
    } else {
        Severity::Disqualifying
    }
}

/// The label of `structure`, or which properties it lacks.
pub fn check_entry_properties(structure: &Structure) -> Result<&str, ResourceShapeError> {
    FORMULA_PROPERTIES
        .iter()
        .find_map(|property| structure.attribute(property).and_then(|value| value.as_str()))
        .ok_or_else(|| {
            warn!(id = %structure.id, "entry has no usable chemical formula");
            ResourceShapeError {
                id: structure.id.clone(),
                missing: FORMULA_PROPERTIES.to_vec(),
            }
        })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn envelope(value: serde_json::Value) -> ResponseEnvelope {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn partial_data_is_reported_and_kept() {
        let response = envelope(json!({
            "data": [{"id": "a", "type": "structures"}, {"id": "b", "type": "structures"}],
            "errors": [{"detail": "page truncated", "status": "500"}]
        }));

        let (message, statuses) = handle_errors(&response).unwrap();

        assert_eq!(message, "Error(s) during querying, but 2 structures found.");
        assert_eq!(statuses, BTreeSet::from([500]));
        assert_eq!(response.resources().len(), 2);
    }

    #[test]
    fn details_are_listed() {
        let response = envelope(json!({
            "errors": [
                {"detail": "bad filter", "status": "400"},
                {"title": "no detail", "status": "nope"},
                {"detail": "also bad", "status": "501"},
            ]
        }));

        let (message, statuses) = handle_errors(&response).unwrap();

        assert_eq!(
            message,
            "Error(s) during querying. Message(s) from server:\n - bad filter\n - also bad"
        );
        assert_eq!(statuses, BTreeSet::from([400, 501]));
    }

    #[test]
    fn errors_without_detail_get_generic_message() {
        let response = envelope(json!({"errors": [{"status": "503"}]}));
        let (message, _) = handle_errors(&response).unwrap();
        assert_eq!(message, "Error during querying, please try again later.");
    }

    #[test]
    fn no_errors_no_message() {
        let response = envelope(json!({"data": []}));
        let (message, statuses) = handle_errors(&response).unwrap();
        assert!(message.is_empty());
        assert!(statuses.is_empty());
    }

    #[test]
    fn neither_data_nor_errors_fails() {
        let result = handle_errors(&envelope(json!({})));
        assert!(result.is_err(), "expected InputError, found: {result:?}");
    }

    #[test]
    fn missing_optional_endpoint_is_recoverable() {
        assert_eq!(classify(&BTreeSet::new(), true), Severity::None);
        assert_eq!(classify(&BTreeSet::from([404]), true), Severity::Recoverable);
        assert_eq!(classify(&BTreeSet::from([404]), false), Severity::Disqualifying);
        assert_eq!(
            classify(&BTreeSet::from([404, 500]), true),
            Severity::Disqualifying
        );
    }

    #[test]
    fn label_prefers_descriptive_formula() {
        let structure: Structure = serde_json::from_value(json!({
            "id": "mp-1",
            "type": "structures",
            "attributes": {
                "chemical_formula_reduced": "O2Si",
                "chemical_formula_descriptive": "SiO2",
            }
        }))
        .unwrap();
        assert_eq!(check_entry_properties(&structure).unwrap(), "SiO2");
    }

    #[test]
    fn null_formulas_are_missing() {
        let structure: Structure = serde_json::from_value(json!({
            "id": "mp-2",
            "type": "structures",
            "attributes": {"chemical_formula_descriptive": null, "nsites": 3}
        }))
        .unwrap();
        let err = check_entry_properties(&structure).unwrap_err();
        assert_eq!(err.id, "mp-2");
        assert_eq!(err.missing, FORMULA_PROPERTIES.to_vec());
    }
}
