use serde::{Deserialize, Serialize};

/// Failure body returned by the inventory authority on non-success responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub detail: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_authority_failure_body() {
        let body: ApiError =
            serde_json::from_str(r#"{"detail":"Server not found"}"#).expect("decode");
        assert_eq!(body.detail, "Server not found");
    }

    #[test]
    fn validation_failures_with_list_detail_do_not_decode() {
        let raw = r#"{"detail":[{"loc":["path","server_id"],"msg":"not an integer"}]}"#;
        assert!(serde_json::from_str::<ApiError>(raw).is_err());
    }
}
