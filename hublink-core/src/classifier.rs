//! Classifies create-shipment responses.
//!
//! Some providers answer with an error envelope (non-2xx, or
//! `"status": "Error"`) even though the shipment was created and an order
//! number was issued. Such a response counts as created: retrying it would
//! book the parcel twice.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderResponse {
    Success { id: String },
    AmbiguousSuccess { id: String, message: String },
    Error { message: String },
}

impl ProviderResponse {
    pub fn id(&self) -> Option<&str> {
        match self {
            ProviderResponse::Success { id } | ProviderResponse::AmbiguousSuccess { id, .. } => Some(id),
            ProviderResponse::Error { .. } => None,
        }
    }
}

/// `{"status": "Success", "description": "...", "orderNos": {"<reference>": "<orderNo>"}}`
pub fn classify_create_response(http_ok: bool, body: &Value, reference: &str) -> ProviderResponse {
    let envelope_ok = http_ok
        && body
            .get("status")
            .and_then(Value::as_str)
            .map(|s| s.eq_ignore_ascii_case("success"))
            .unwrap_or(false);

    let message = body
        .get("description")
        .or_else(|| body.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string());

    match (envelope_ok, extract_order_no(body, reference)) {
        (true, Some(id)) => ProviderResponse::Success { id },
        (false, Some(id)) => ProviderResponse::AmbiguousSuccess { id, message },
        (true, None) => ProviderResponse::Error {
            message: format!("success response without shipment identifier: {}", message),
        },
        (false, None) => ProviderResponse::Error { message },
    }
}

fn extract_order_no(body: &Value, reference: &str) -> Option<String> {
    let non_empty = |v: &Value| v.as_str().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);

    if let Some(order_nos) = body.get("orderNos").and_then(Value::as_object) {
        if let Some(id) = order_nos.get(reference).and_then(non_empty) {
            return Some(id);
        }
        if let Some(id) = order_nos.values().find_map(non_empty) {
            return Some(id);
        }
    }

    body.get("orderNo").and_then(non_empty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success() {
        let body = json!({"status": "Success", "orderNos": {"so-1": "FZ100"}});
        assert_eq!(
            classify_create_response(true, &body, "so-1"),
            ProviderResponse::Success { id: "FZ100".to_string() }
        );
    }

    #[test]
    fn test_error_envelope_with_id_is_ambiguous_success() {
        let body = json!({"status": "Error", "description": "Duplicate request", "orderNos": {"so-1": "FZ100"}});

        let classified = classify_create_response(false, &body, "so-1");
        assert_eq!(
            classified,
            ProviderResponse::AmbiguousSuccess {
                id: "FZ100".to_string(),
                message: "Duplicate request".to_string()
            }
        );
        assert_eq!(classified.id(), Some("FZ100"));
    }

    #[test]
    fn test_error_without_id() {
        let body = json!({"status": "Error", "description": "Invalid state", "orderNos": {}});
        assert_eq!(
            classify_create_response(false, &body, "so-1"),
            ProviderResponse::Error { message: "Invalid state".to_string() }
        );
    }

    #[test]
    fn test_success_without_id_is_error() {
        let body = json!({"status": "Success", "orderNos": {"so-1": ""}});
        assert!(matches!(
            classify_create_response(true, &body, "so-1"),
            ProviderResponse::Error { .. }
        ));
    }

    #[test]
    fn test_falls_back_to_any_order_no() {
        let body = json!({"status": "Success", "orderNos": {"other-ref": "FZ7"}});
        assert_eq!(classify_create_response(true, &body, "so-1").id(), Some("FZ7"));

        let body = json!({"status": "Success", "orderNo": "FZ8"});
        assert_eq!(classify_create_response(true, &body, "so-1").id(), Some("FZ8"));
    }
}
