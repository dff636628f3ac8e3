mod support;

use consent_core::contract::SubmissionRecord;
use serde_json::json;
use support::{signature_data_url, Harness, PNG};

fn seed_legacy(harness: &Harness) {
    harness.kv.seed(
        "submission_alex_kim_1700000000000",
        json!({
            "fullName": "Alex Kim",
            "email": "alex@example.com",
            "dob": "1985-02-02",
            "event": "Winter Fair",
            "signature": signature_data_url(),
        })
        .to_string()
        .as_bytes(),
    );
    harness.kv.seed(
        "submission_rae_park_1700000005000",
        json!({
            "firstName": "Rae",
            "lastName": "Park",
            "email": "rae@example.com",
            "signatureUrl": "rae_park_1700000005000.png",
        })
        .to_string()
        .as_bytes(),
    );
    harness.blobs.seed("rae_park_1700000005000.png", PNG);
}

#[test]
fn dry_run_then_migrate_then_lookup() {
    let harness = Harness::new();
    seed_legacy(&harness);

    let planned = harness.admin("POST", "/admin/migrate", json!({}), Some(json!({"dry_run": true})));
    assert_eq!(planned.status_code, 200);
    let planned = planned.json_body();
    assert_eq!(planned["planned"].as_array().map(Vec::len), Some(2));
    assert_eq!(harness.kv.len(), 2);

    let migrated = harness.admin("POST", "/admin/migrate", json!({}), None);
    assert_eq!(migrated.status_code, 200);
    assert_eq!(migrated.json_body()["migrated"], 2);
    assert!(harness.blobs.body("rae_park_1700000005000.png").is_none());

    let fair = harness.admin("GET", "/admin/submissions", json!({"event": "Winter Fair"}), None);
    let submissions = fair.json_body()["submissions"].clone();
    assert_eq!(submissions.as_array().map(Vec::len), Some(1));
    let record: SubmissionRecord =
        serde_json::from_value(submissions[0].clone()).expect("record should parse");
    assert_eq!(record.first_name, "Alex");
    assert_eq!(record.last_name, "Kim");
    assert_eq!(harness.blobs.body(&record.signature_path).as_deref(), Some(PNG));

    let general = harness.admin("GET", "/admin/submissions", json!({}), None);
    assert_eq!(general.json_body()["submissions"][0]["email"], "rae@example.com");

    let again = harness.admin("POST", "/admin/migrate", json!({}), None);
    assert_eq!(again.json_body()["scanned"], 0);
}

#[test]
fn migrate_requires_admin_token() {
    let harness = Harness::new();
    seed_legacy(&harness);

    let response = harness.send(json!({
        "httpMethod": "POST",
        "path": "/admin/migrate",
        "headers": {"Authorization": "Bearer wrong"},
    }));
    assert_eq!(response.status_code, 401);
    assert_eq!(harness.kv.len(), 2);
}
