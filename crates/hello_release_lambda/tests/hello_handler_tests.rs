use hello_release_lambda::handlers::hello::{handle_hello_event, HelloConfig};
use serde_json::json;

fn config(stage_name: &str) -> HelloConfig {
    HelloConfig::from_lookup(|key| (key == "STAGE_NAME").then(|| stage_name.to_string()))
        .expect("stage name should resolve")
}

#[test]
fn every_stage_name_is_echoed_with_status_200() {
    for stage_name in ["dev", "prod", "", "staging-eu", "ünïcode", "with space"] {
        let response = handle_hello_event(&json!({}), &config(stage_name));
        assert_eq!(response.status_code, 200);
        assert_eq!(
            response.body,
            format!("Hello from {stage_name} environment!\n")
        );
    }
}

#[test]
fn path_and_method_do_not_change_the_response() {
    let config = config("prod");
    let root = handle_hello_event(&json!({"httpMethod": "GET", "path": "/"}), &config);
    let nested = handle_hello_event(
        &json!({"httpMethod": "POST", "path": "/any/nested/path", "body": "{}"}),
        &config,
    );
    assert_eq!(root, nested);
    assert_eq!(root.body, "Hello from prod environment!\n");
}

#[test]
fn response_is_plain_text() {
    let response = handle_hello_event(&json!({}), &config("dev"));
    assert_eq!(response.headers, json!({"Content-Type": "text/plain"}));
    assert!(!response.is_base64_encoded);
}
