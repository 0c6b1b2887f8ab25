//! Argument decoding shared by behavior commands.

use serde_json::Value;

use shardhub_domain::entry::{EntryKind, MAX_PIN_INDEX};
use shardhub_domain::error::{HubError, ValidationError};

pub(crate) fn invalid(command: &str, reason: impl Into<String>) -> HubError {
    ValidationError::InvalidArgument {
        command: command.to_string(),
        reason: reason.into(),
    }
    .into()
}

pub(crate) fn unknown(kind: EntryKind, command: &str) -> HubError {
    ValidationError::UnknownCommand {
        kind,
        command: command.to_string(),
    }
    .into()
}

fn level(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(level) => Some(*level),
        Value::Number(n) => n.as_f64().map(|n| n != 0.0),
        _ => None,
    }
}

/// A boolean given bare (`true`, `1`) or as `{ "value": … }`.
pub(crate) fn bool_arg(command: &str, args: &Value) -> Result<bool, HubError> {
    let raw = args.get("value").unwrap_or(args);
    level(raw).ok_or_else(|| invalid(command, format!("expected a boolean, got {raw}")))
}

/// A fraction given bare (`0.5`) or as `{ "value": … }`.
pub(crate) fn fraction_arg(command: &str, args: &Value) -> Result<f64, HubError> {
    let raw = args.get("value").unwrap_or(args);
    raw.as_f64()
        .ok_or_else(|| invalid(command, format!("expected a number, got {raw}")))
}

/// A pin index under `index` (or `pin`).
pub(crate) fn index_arg(command: &str, args: &Value) -> Result<u8, HubError> {
    let raw = args
        .get("index")
        .or_else(|| args.get("pin"))
        .ok_or_else(|| invalid(command, "missing `index`"))?;
    let index = raw
        .as_u64()
        .ok_or_else(|| invalid(command, format!("`index` must be an integer, got {raw}")))?;
    match u8::try_from(index) {
        Ok(index) if index <= MAX_PIN_INDEX => Ok(index),
        _ => Err(ValidationError::PinOutOfRange(u8::try_from(index).unwrap_or(u8::MAX)).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn should_accept_bare_or_wrapped_booleans() {
        assert!(bool_arg("set", &json!(true)).unwrap());
        assert!(bool_arg("set", &json!({"value": 1})).unwrap());
        assert!(!bool_arg("set", &json!({"value": 0})).unwrap());
        assert!(bool_arg("set", &json!("on")).is_err());
    }

    #[test]
    fn should_read_index_or_pin_key() {
        assert_eq!(index_arg("emulatePin", &json!({"index": 4})).unwrap(), 4);
        assert_eq!(index_arg("emulatePin", &json!({"pin": 15})).unwrap(), 15);
        assert!(index_arg("emulatePin", &json!({})).is_err());
    }

    #[test]
    fn should_reject_out_of_range_index() {
        let err = index_arg("emulatePin", &json!({"index": 99})).unwrap_err();
        assert!(matches!(
            err,
            HubError::Validation(ValidationError::PinOutOfRange(99))
        ));
    }

    #[test]
    fn should_parse_fraction() {
        assert!((fraction_arg("power", &json!(0.5)).unwrap() - 0.5).abs() < f64::EPSILON);
        assert!((fraction_arg("power", &json!({"value": 1})).unwrap() - 1.0).abs() < f64::EPSILON);
        assert!(fraction_arg("power", &json!("half")).is_err());
    }
}
