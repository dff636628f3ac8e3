mod support;

use consent_core::contract::SubmissionRecord;
use serde_json::{json, Value};
use support::{adult_submission, signature_data_url, Harness, PNG};

const JANE_KEY: &str = "submission:spring-gala:jane-example-com:doe-jane:20260520T093000000Z";

fn with(mut base: Value, extra: Value) -> Value {
    if let (Value::Object(base), Value::Object(extra)) = (&mut base, extra) {
        base.extend(extra);
    }
    base
}

#[test]
fn submit_lookup_get_and_delete_round_trip() {
    let harness = Harness::new();

    let accepted = harness.submit(adult_submission());
    assert_eq!(accepted.status_code, 201);
    assert_eq!(accepted.headers["Access-Control-Allow-Origin"], "*");
    let accepted = accepted.json_body();
    assert_eq!(accepted["key"], JANE_KEY);
    let signature_path = accepted["signature_path"]
        .as_str()
        .map(str::to_string)
        .expect("signature path should be returned");
    assert_eq!(harness.blobs.body(&signature_path).as_deref(), Some(PNG));

    let lookup = harness.admin(
        "GET",
        "/admin/submissions",
        json!({"event": "Spring Gala", "email": "jane@example.com"}),
        None,
    );
    assert_eq!(lookup.status_code, 200);
    let submissions = lookup.json_body()["submissions"]
        .as_array()
        .cloned()
        .expect("submissions should be an array");
    assert_eq!(submissions.len(), 1);
    let record: SubmissionRecord =
        serde_json::from_value(submissions[0].clone()).expect("record should parse");
    assert_eq!(record.email, "jane@example.com");
    assert!(!record.is_minor);
    assert!(record.media_consent);

    let fetched = harness.admin(
        "GET",
        &format!("/admin/submissions/{JANE_KEY}"),
        json!({"include_signature": "true"}),
        None,
    );
    assert_eq!(fetched.status_code, 200);
    assert_eq!(fetched.json_body()["signature_data_url"], signature_data_url());

    let deleted = harness.admin("DELETE", &format!("/admin/submissions/{JANE_KEY}"), json!({}), None);
    assert_eq!(deleted.status_code, 200);
    assert_eq!(deleted.json_body()["blobs_deleted"], json!([signature_path]));
    assert!(harness.kv.is_empty());
    assert!(harness.blobs.is_empty());

    let gone = harness.admin("GET", &format!("/admin/submissions/{JANE_KEY}"), json!({}), None);
    assert_eq!(gone.status_code, 404);
}

#[test]
fn minor_requires_guardian_before_anything_is_stored() {
    let harness = Harness::new();
    let minor = with(adult_submission(), json!({"dateOfBirth": "2013-08-01"}));

    let rejected = harness.submit(minor.clone());
    assert_eq!(rejected.status_code, 400);
    let fields: Vec<String> = rejected.json_body()["fields"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|entry| entry["field"].as_str().map(str::to_string))
        .collect();
    assert!(fields.contains(&"guardian_name".to_string()));
    assert!(fields.contains(&"guardian_signature".to_string()));
    assert!(harness.kv.is_empty());
    assert!(harness.blobs.is_empty());

    let accepted = harness.submit(with(
        minor,
        json!({"guardianName": "Pat Doe", "guardianSignature": signature_data_url()}),
    ));
    assert_eq!(accepted.status_code, 201);
    assert_eq!(harness.blobs.len(), 2);

    let deleted = harness.admin("DELETE", &format!("/admin/submissions/{JANE_KEY}"), json!({}), None);
    assert_eq!(deleted.status_code, 200);
    assert!(harness.blobs.is_empty());
}

#[test]
fn name_filter_narrows_event_lookup() {
    let harness = Harness::new();
    assert_eq!(harness.submit(adult_submission()).status_code, 201);
    assert_eq!(
        harness
            .submit(with(
                adult_submission(),
                json!({"firstName": "Sam", "lastName": "Lee", "email": "sam@example.com"}),
            ))
            .status_code,
        201
    );

    let everyone = harness.admin("GET", "/admin/submissions", json!({"event": "spring gala"}), None);
    assert_eq!(everyone.json_body()["submissions"].as_array().map(Vec::len), Some(2));

    let lees = harness.admin(
        "GET",
        "/admin/submissions",
        json!({"event": "spring gala", "name": "Lee"}),
        None,
    );
    let lees = lees.json_body();
    assert_eq!(lees["submissions"].as_array().map(Vec::len), Some(1));
    assert_eq!(lees["submissions"][0]["first_name"], "Sam");
}

#[test]
fn storage_outage_surfaces_as_bad_gateway() {
    let harness = Harness::new();
    harness.blobs.deny_writes_containing("signatures/");

    let response = harness.submit(adult_submission());
    assert_eq!(response.status_code, 502);
    assert!(harness.kv.is_empty());
}
