//! Test assertion macros and helpers.

use crate::error::{CtnrError, ErrorCode};

/// Assert that a result is Ok.
#[macro_export]
macro_rules! assert_ok {
    ($expr:expr) => {
        match &$expr {
            Ok(_) => (),
            Err(e) => panic!("assertion failed: expected Ok, got Err({:?})", e),
        }
    };
    ($expr:expr, $($arg:tt)+) => {
        match &$expr {
            Ok(_) => (),
            Err(e) => panic!("assertion failed: {}: expected Ok, got Err({:?})", format_args!($($arg)+), e),
        }
    };
}

/// Assert that a result is Err.
#[macro_export]
macro_rules! assert_err {
    ($expr:expr) => {
        match &$expr {
            Err(_) => (),
            Ok(v) => panic!("assertion failed: expected Err, got Ok({:?})", v),
        }
    };
    ($expr:expr, $($arg:tt)+) => {
        match &$expr {
            Err(_) => (),
            Ok(v) => panic!("assertion failed: {}: expected Err, got Ok({:?})", format_args!($($arg)+), v),
        }
    };
}

/// Assert that a `CtnrError` carries a specific [`ErrorCode`].
///
/// ```ignore
/// let result: Result<(), CtnrError> = Err(CtnrError::invalid_state(ErrorDomain::Workflow, "x"));
/// assert_err_code!(result, ErrorCode::InvalidState);
/// ```
#[macro_export]
macro_rules! assert_err_code {
    ($expr:expr, $code:expr) => {
        match &$expr {
            Err(e) => assert_eq!(
                e.code, $code,
                "assertion failed: expected error code {:?}, got {:?}",
                $code, e.code
            ),
            Ok(v) => panic!(
                "assertion failed: expected Err(code={:?}), got Ok({:?})",
                $code, v
            ),
        }
    };
}

/// Assert that an HTTP call was made.
#[macro_export]
macro_rules! assert_http_called {
    ($mock:expr, $pattern:expr) => {
        $mock.assert_called($pattern);
    };
}

/// Assert that an HTTP call was not made.
#[macro_export]
macro_rules! assert_http_not_called {
    ($mock:expr, $pattern:expr) => {
        $mock.assert_not_called($pattern);
    };
}

/// Assert that a tool was invoked through a [`super::mock_dispatch::MockToolDispatch`].
#[macro_export]
macro_rules! assert_tool_invoked {
    ($dispatch:expr, $tool:expr) => {
        $dispatch.assert_invoked($tool);
    };
    ($dispatch:expr, $tool:expr, $predicate:expr) => {
        $dispatch.assert_invoked_with($tool, $predicate);
    };
}

// =========================================================================
// HELPER FUNCTIONS
// =========================================================================

/// Check if an error message contains a substring.
pub fn error_contains(error: &CtnrError, substring: &str) -> bool {
    error.to_string().contains(substring) || error.message.contains(substring)
}

/// Check if a validation-failure error's context mentions a specific field path.
pub fn validation_error_for_field(error: &CtnrError, field: &str) -> bool {
    error.code == ErrorCode::ValidationFailed
        && (error.message.contains(field)
            || error
                .context
                .get("path")
                .and_then(|v| v.as_str())
                .map(|p| p.contains(field))
                .unwrap_or(false))
}

/// Assert that a value matches a JSON pattern (partial matching).
///
/// The pattern only needs to contain the fields you want to verify; extra
/// fields in the actual value are ignored.
pub fn assert_json_matches(actual: &serde_json::Value, pattern: &serde_json::Value) -> bool {
    match (actual, pattern) {
        (serde_json::Value::Object(a), serde_json::Value::Object(p)) => {
            for (key, expected_value) in p {
                match a.get(key) {
                    Some(actual_value) => {
                        if !assert_json_matches(actual_value, expected_value) {
                            return false;
                        }
                    }
                    None => return false,
                }
            }
            true
        }
        (serde_json::Value::Array(a), serde_json::Value::Array(p)) => {
            if a.len() != p.len() {
                return false;
            }
            a.iter().zip(p.iter()).all(|(a, p)| assert_json_matches(a, p))
        }
        (a, p) => a == p,
    }
}

/// Assert that an array contains an element matching a predicate.
pub fn assert_contains<T, F>(items: &[T], predicate: F) -> bool
where
    F: Fn(&T) -> bool,
{
    items.iter().any(predicate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorDomain;

    #[test]
    fn assert_ok_macro_passes() {
        let result: Result<i32, String> = Ok(42);
        assert_ok!(result);
    }

    #[test]
    #[should_panic(expected = "expected Ok")]
    fn assert_ok_macro_fails() {
        let result: Result<i32, String> = Err("error".to_string());
        assert_ok!(result);
    }

    #[test]
    fn assert_err_macro_passes() {
        let result: Result<i32, String> = Err("error".to_string());
        assert_err!(result);
    }

    #[test]
    fn error_contains_checks_message() {
        let error = CtnrError::invalid_argument(ErrorDomain::Workflow, "email is required");
        assert!(error_contains(&error, "email"));
        assert!(!error_contains(&error, "password"));
    }

    #[test]
    fn validation_error_for_field_checks_code_and_message() {
        let error = CtnrError::new(
            ErrorCode::ValidationFailed,
            ErrorDomain::Docker,
            "dockerfile_path: is invalid",
        );
        assert!(validation_error_for_field(&error, "dockerfile_path"));
        assert!(!validation_error_for_field(&error, "image_tag"));

        let other = CtnrError::internal(ErrorDomain::Docker, "boom");
        assert!(!validation_error_for_field(&other, "dockerfile_path"));
    }

    #[test]
    fn json_matches_partial_object_and_array() {
        let actual = serde_json::json!({"id": 123, "name": "Test", "nested": {"foo": "bar"}});
        assert!(assert_json_matches(&actual, &serde_json::json!({"id": 123})));
        assert!(assert_json_matches(&actual, &serde_json::json!({"nested": {"foo": "bar"}})));
        assert!(!assert_json_matches(&actual, &serde_json::json!({"id": 456})));

        let arr = serde_json::json!([1, 2, 3]);
        assert!(assert_json_matches(&arr, &serde_json::json!([1, 2, 3])));
        assert!(!assert_json_matches(&arr, &serde_json::json!([1, 2])));
    }

    #[test]
    fn contains_finds_matching_element() {
        let items = vec![1, 2, 3, 4, 5];
        assert!(assert_contains(&items, |x| *x == 3));
        assert!(!assert_contains(&items, |x| *x == 6));
    }
}
