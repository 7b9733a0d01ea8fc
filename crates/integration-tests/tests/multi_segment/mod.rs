use indoc::formatdoc;
use integration_tests::{
    TestServer,
    upstreams::{
        TencentMock,
        tencent::{SECRET_ID, SECRET_KEY},
    },
};
use serde_json::{Value, json};

#[tokio::test]
async fn text_to_image_submits_then_polls() {
    let tencent = TencentMock::new().spawn().await;

    let flavors = tempfile::tempdir().unwrap();
    tencent.write_tencent_flavor(flavors.path());

    let config = formatdoc! {r#"
        [gateway]
        flavors_dir = "{}"

        [gateway.upstream]
        poll_interval = "10ms"
        max_poll_attempts = 5
    "#, flavors.path().display()};

    let server = TestServer::start(&config).await;

    server
        .install(json!({
            "provider_name": "remote_tencent_text-to-image",
            "service_name": "text-to-image",
            "service_source": "remote",
            "api_flavor": "tencent",
            "auth_key": json!({"secret_id": SECRET_ID, "secret_key": SECRET_KEY}).to_string(),
            "models": ["hunyuan-image"],
        }))
        .await;

    let request = json!({"model": "hunyuan-image", "prompt": "a red panda", "n": 2});

    let response = server.client.post("/aog/v0.2/services/text-to-image", &request).await;
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();

    assert_eq!(body["status"], "SUCCEEDED");
    insta::assert_json_snapshot!(body["images"], @r#"
    [
      "http://images.test/1.png",
      "http://images.test/2.png"
    ]
    "#);

    insta::assert_debug_snapshot!(tencent.calls.all(), @r#"
    [
        "POST /images/generations a red panda",
        "GET /images/tasks/job-1",
        "GET /images/tasks/job-1",
    ]
    "#);
}
