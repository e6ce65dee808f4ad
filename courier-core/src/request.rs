//! Request payload sanitization.
//!
//! Before a payload reaches the transport the pipeline strips its own pagination flags and
//! substitutes the project id placeholder everywhere it appears in a string value.
use crate::auth::PROJECT_ID_PLACEHOLDER;
use serde_json::Value;

/// Pipeline-internal flags that must never reach the server.
pub const INTERNAL_FLAGS: [&str; 3] = ["autoPaginate", "autoPaginateVal", "objectMode"];

#[derive(Debug, thiserror::Error)]
pub enum PrepareError {
    #[error("Request payload must be a JSON object, got {0}")]
    NotAnObject(&'static str),
    #[error(
        "The request references the project id placeholder but no project id could be resolved. Configure `projectId` or use credentials that carry one."
    )]
    MissingProjectId,
}

/// Strips [`INTERNAL_FLAGS`] from the top level of `request` and replaces the project id
/// placeholder. `null` is treated as an empty request.
pub fn sanitize_request(request: Value, project_id: Option<&str>) -> Result<Value, PrepareError> {
    let mut object = match request {
        Value::Object(object) => object,
        Value::Null => serde_json::Map::new(),
        other => return Err(PrepareError::NotAnObject(kind(&other))),
    };

    for flag in INTERNAL_FLAGS {
        object.remove(flag);
    }

    replace_project_id_token(Value::Object(object), project_id)
}

/// Recursively replaces the project id placeholder inside string values. Keys are left
/// untouched.
pub fn replace_project_id_token(
    value: Value,
    project_id: Option<&str>,
) -> Result<Value, PrepareError> {
    match value {
        Value::String(s) if s.contains(PROJECT_ID_PLACEHOLDER) => {
            let project_id = project_id
                .filter(|id| !id.is_empty() && *id != PROJECT_ID_PLACEHOLDER)
                .ok_or(PrepareError::MissingProjectId)?;
            Ok(Value::String(s.replace(PROJECT_ID_PLACEHOLDER, project_id)))
        }
        Value::Array(items) => items
            .into_iter()
            .map(|item| replace_project_id_token(item, project_id))
            .collect::<Result<_, _>>()
            .map(Value::Array),
        Value::Object(object) => object
            .into_iter()
            .map(|(key, field)| Ok((key, replace_project_id_token(field, project_id)?)))
            .collect::<Result<_, _>>()
            .map(Value::Object),
        other => Ok(other),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn internal_flags_are_removed_without_touching_the_input() {
        let request = json!({
            "autoPaginate": true,
            "autoPaginateVal": true,
            "objectMode": true,
            "pageSize": 10,
        });

        let sanitized = sanitize_request(request.clone(), Some("p")).unwrap();

        assert_eq!(sanitized, json!({ "pageSize": 10 }));
        assert_eq!(request["objectMode"], true);
    }

    #[test]
    fn placeholders_are_replaced_at_any_depth() {
        let request = json!({
            "name": "projects/{{projectId}}/topics/t",
            "nested": { "parents": ["projects/{{projectId}}", "other"] },
            "{{projectId}}": 1,
        });

        let sanitized = sanitize_request(request, Some("my-project")).unwrap();

        assert_eq!(
            sanitized,
            json!({
                "name": "projects/my-project/topics/t",
                "nested": { "parents": ["projects/my-project", "other"] },
                "{{projectId}}": 1,
            })
        );
    }

    #[test]
    fn unresolved_project_id_is_a_preparation_error() {
        let request = json!({ "name": "projects/{{projectId}}" });

        for project_id in [None, Some(""), Some(PROJECT_ID_PLACEHOLDER)] {
            assert!(matches!(
                sanitize_request(request.clone(), project_id),
                Err(PrepareError::MissingProjectId)
            ));
        }
    }

    #[test]
    fn requests_without_placeholders_need_no_project() {
        let sanitized = sanitize_request(json!({ "name": "plain" }), None).unwrap();
        assert_eq!(sanitized, json!({ "name": "plain" }));

        assert_eq!(sanitize_request(Value::Null, None).unwrap(), json!({}));
    }

    #[test]
    fn non_object_payloads_are_rejected() {
        assert!(matches!(
            sanitize_request(json!([1, 2]), None),
            Err(PrepareError::NotAnObject("an array"))
        ));
        assert!(matches!(
            sanitize_request(json!("text"), None),
            Err(PrepareError::NotAnObject("a string"))
        ));
    }
}
