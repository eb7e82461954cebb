pub mod approval;
pub mod capabilities;
pub mod decide;
pub mod doctor;
pub mod migrate;
pub mod policy_check;

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::success_with(command, message, None)
    }

    pub fn success_with(command: &str, message: impl Into<String>, data: Option<Value>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            data,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            data: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }
}

/// Serialises `value` for a payload's `data` field; failures become a string note.
pub(crate) fn to_data(value: &impl Serialize) -> Value {
    serde_json::to_value(value)
        .unwrap_or_else(|error| Value::String(format!("unserializable payload: {error}")))
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::CommandResult;

    #[test]
    fn data_is_omitted_when_absent() {
        let result = CommandResult::success("migrate", "done");
        let payload: Value = serde_json::from_str(&result.output).expect("json");
        assert!(payload.get("data").is_none());
        assert_eq!(payload["error_class"], Value::Null);
    }

    #[test]
    fn failure_carries_error_class_and_exit_code() {
        let result = CommandResult::failure("decide", "invalid_input", "bad \"quote\"", 3);
        let payload: Value = serde_json::from_str(&result.output).expect("json");
        assert_eq!(result.exit_code, 3);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["message"], "bad \"quote\"");

        let ok = CommandResult::success_with("x", "y", Some(json!({"k": 1})));
        let payload: Value = serde_json::from_str(&ok.output).expect("json");
        assert_eq!(payload["data"]["k"], 1);
    }
}
