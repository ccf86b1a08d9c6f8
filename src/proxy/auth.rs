//! Caller authentication for mutating requests.

use crate::http::request::{Method, Request};

/// Methods that must present the shared bearer token. Read methods are
/// passed through without a check.
pub const AUTHENTICATED_METHODS: &[Method] = &[Method::POST];

/// Checks `Authorization: Bearer <token>` against the configured secret.
#[derive(Clone)]
pub struct AuthGuard {
    expected: String,
}

impl AuthGuard {
    pub fn new(token: &str) -> Self {
        Self {
            expected: format!("Bearer {token}"),
        }
    }

    pub fn requires_auth(method: Method) -> bool {
        AUTHENTICATED_METHODS.contains(&method)
    }

    /// True when the request may proceed.
    pub fn permits(&self, request: &Request) -> bool {
        if !Self::requires_auth(request.method) {
            return true;
        }

        request
            .header("Authorization")
            .is_some_and(|provided| constant_time_str_eq(provided, &self.expected))
    }
}

impl std::fmt::Debug for AuthGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGuard").finish_non_exhaustive()
    }
}

fn constant_time_str_eq(left: &str, right: &str) -> bool {
    let left_bytes = left.as_bytes();
    let right_bytes = right.as_bytes();
    let max_len = left_bytes.len().max(right_bytes.len());
    let mut diff = left_bytes.len() ^ right_bytes.len();

    for i in 0..max_len {
        let l = left_bytes.get(i).copied().unwrap_or(0);
        let r = right_bytes.get(i).copied().unwrap_or(0);
        diff |= (l ^ r) as usize;
    }

    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::RequestBuilder;

    fn request(method: Method, auth: Option<&str>) -> Request {
        let mut builder = RequestBuilder::new().method(method).path("/api/v1/chat");
        if let Some(value) = auth {
            builder = builder.header("authorization", value);
        }
        builder.build().unwrap()
    }

    #[test]
    fn post_requires_exact_bearer_token() {
        let guard = AuthGuard::new("s3cret");

        assert!(guard.permits(&request(Method::POST, Some("Bearer s3cret"))));
        assert!(!guard.permits(&request(Method::POST, None)));
        assert!(!guard.permits(&request(Method::POST, Some("Bearer s3cre"))));
        assert!(!guard.permits(&request(Method::POST, Some("Bearer s3cret "))));
        assert!(!guard.permits(&request(Method::POST, Some("bearer s3cret"))));
        assert!(!guard.permits(&request(Method::POST, Some("s3cret"))));
    }

    #[test]
    fn get_is_not_checked() {
        let guard = AuthGuard::new("s3cret");

        assert!(guard.permits(&request(Method::GET, None)));
        assert!(guard.permits(&request(Method::GET, Some("Bearer wrong"))));
    }

    #[test]
    fn constant_time_eq_handles_length_mismatch() {
        assert!(constant_time_str_eq("abc", "abc"));
        assert!(!constant_time_str_eq("abc", "abcd"));
        assert!(!constant_time_str_eq("", "a"));
    }
}
