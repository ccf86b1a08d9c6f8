use keyrelay::http::request::{Method, Request, RequestBuilder};

fn request_with(version: &str, headers: &[(&str, &str)]) -> Request {
    Request {
        method: Method::GET,
        path: "/".to_string(),
        version: version.to_string(),
        headers: headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        body: vec![],
    }
}

#[test]
fn test_request_header_retrieval_ignores_case() {
    let req = request_with("HTTP/1.1", &[("Host", "example.com"), ("content-type", "application/json")]);

    assert_eq!(req.header("host"), Some("example.com"));
    assert_eq!(req.header("Content-Type"), Some("application/json"));
    assert_eq!(req.header("Missing"), None);
}

#[test]
fn test_request_repeated_headers_are_kept_in_order() {
    let req = RequestBuilder::new()
        .method(Method::GET)
        .path("/")
        .header("Accept", "text/plain")
        .header("accept", "application/json")
        .build()
        .unwrap();

    assert_eq!(req.headers.len(), 2);
    assert_eq!(req.header("ACCEPT"), Some("text/plain"));
}

#[test]
fn test_request_keep_alive_http11_default() {
    assert!(request_with("HTTP/1.1", &[]).keep_alive());
}

#[test]
fn test_request_keep_alive_http10_default() {
    assert!(!request_with("HTTP/1.0", &[]).keep_alive());
    assert!(request_with("HTTP/1.0", &[("Connection", "keep-alive")]).keep_alive());
}

#[test]
fn test_request_keep_alive_close() {
    assert!(!request_with("HTTP/1.1", &[("Connection", "close")]).keep_alive());
    assert!(!request_with("HTTP/1.1", &[("connection", "Close")]).keep_alive());
}

#[test]
fn test_request_route_and_query() {
    let req = RequestBuilder::new()
        .method(Method::GET)
        .path("/api/v1/models?x=1&redirect=/a?b")
        .build()
        .unwrap();

    assert_eq!(req.route(), "/api/v1/models");
    assert_eq!(req.query(), Some("x=1&redirect=/a?b"));

    let bare = RequestBuilder::new().method(Method::GET).path("/api/v1/models").build().unwrap();
    assert_eq!(bare.route(), "/api/v1/models");
    assert_eq!(bare.query(), None);
}

#[test]
fn test_request_method_from_string() {
    assert_eq!(Method::from_str("GET"), Some(Method::GET));
    assert_eq!(Method::from_str("POST"), Some(Method::POST));
    assert_eq!(Method::from_str("INVALID"), None);
    assert_eq!(Method::from_str("get"), None); // Case-sensitive
}

#[test]
fn test_only_post_is_a_write_method() {
    assert!(Method::POST.is_write());
    assert!(!Method::GET.is_write());
    assert!(!Method::HEAD.is_write());
}

#[test]
fn test_request_builder_requires_method_and_path() {
    assert!(RequestBuilder::new().path("/").build().is_err());
    assert!(RequestBuilder::new().method(Method::GET).build().is_err());

    let req = RequestBuilder::new()
        .method(Method::POST)
        .path("/api")
        .body("payload")
        .build()
        .unwrap();
    assert_eq!(req.version, "HTTP/1.1");
    assert_eq!(req.body, b"payload".to_vec());
}
