use httpmock::prelude::*;
use serde_json::json;
use wecom_bridge::config::Config;
use wecom_bridge::state::AppState;
use wecom_bridge::wecom::callback::InboundEvent;

fn config(server: &MockServer, dir: &tempfile::TempDir) -> Config {
    let mut config = Config::default();
    config.wecom.token = Some("cb-token".to_string());
    config.wecom.corp_id = Some("ww123".to_string());
    config.wecom.agent_id = Some("1000002".to_string());
    config.wecom.agent_secret = Some("secret".to_string());
    config.wecom.api_base_url = server.base_url();
    config.wecom.http_timeout_s = 5.0;
    config.storage.db_path = dir.path().join("bridge.db").to_string_lossy().to_string();
    config
}

fn mock_gettoken<'a>(server: &'a MockServer, token: &str) -> httpmock::Mock<'a> {
    let token = token.to_string();
    server.mock(move |when, then| {
        when.method(GET)
            .path("/cgi-bin/gettoken")
            .query_param("corpid", "ww123")
            .query_param("corpsecret", "secret");
        then.status(200)
            .json_body(json!({"errcode": 0, "errmsg": "ok", "access_token": token, "expires_in": 7200}));
    })
}

fn text_event(user: &str, content: &str) -> InboundEvent {
    InboundEvent {
        from_user: user.to_string(),
        to_user: Some("ww123".to_string()),
        create_time: Some(1_710_000_000),
        msg_id: Some("42".to_string()),
        agent_id: Some("1000002".to_string()),
        msg_type: "text".to_string(),
        event: None,
        content: Some(content.to_string()),
    }
}

#[tokio::test]
async fn echo_reaches_vendor_as_single_text_message() {
    let server = MockServer::start();
    let dir = tempfile::tempdir().expect("tempdir");
    let gettoken = mock_gettoken(&server, "tok-1");
    let send = server.mock(|when, then| {
        when.method(POST)
            .path("/cgi-bin/message/send")
            .query_param("access_token", "tok-1")
            .json_body(json!({
                "msgtype": "text",
                "agentid": 1000002,
                "touser": "u1",
                "text": {"content": "hello world"}
            }));
        then.status(200).json_body(json!({"errcode": 0, "errmsg": "ok"}));
    });

    let state = AppState::new(config(&server, &dir)).expect("state");
    state
        .dispatcher
        .accept(text_event("u1", "echo hello world"))
        .expect("text dispatched")
        .await
        .expect("join");

    send.assert_calls(1);
    gettoken.assert_calls(1);
}

#[tokio::test]
async fn ping_replies_pong_and_token_survives_restart() {
    let server = MockServer::start();
    let dir = tempfile::tempdir().expect("tempdir");
    let gettoken = mock_gettoken(&server, "tok-1");
    let send = server.mock(|when, then| {
        when.method(POST)
            .path("/cgi-bin/message/send")
            .json_body_includes(json!({"text": {"content": "pong"}}).to_string());
        then.status(200).json_body(json!({"errcode": 0, "errmsg": "ok"}));
    });

    let first = AppState::new(config(&server, &dir)).expect("state");
    first.dispatcher.run("u1", "ping").await;
    drop(first);

    let restarted = AppState::new(config(&server, &dir)).expect("state");
    restarted.dispatcher.run("u1", "ping").await;

    send.assert_calls(2);
    gettoken.assert_calls(1);
}

#[tokio::test]
async fn expired_token_is_refreshed_once_mid_pipeline() {
    let server = MockServer::start();
    let dir = tempfile::tempdir().expect("tempdir");
    let mut stale_gettoken = mock_gettoken(&server, "stale");

    let state = AppState::new(config(&server, &dir)).expect("state");
    let sender = state.sender.clone().expect("sender");
    assert_eq!(sender.get_token().await.expect("token"), "stale");
    stale_gettoken.delete();

    let fresh_gettoken = mock_gettoken(&server, "fresh");
    let stale_send = server.mock(|when, then| {
        when.method(POST)
            .path("/cgi-bin/message/send")
            .query_param("access_token", "stale");
        then.status(200)
            .json_body(json!({"errcode": 42001, "errmsg": "access_token expired"}));
    });
    let fresh_send = server.mock(|when, then| {
        when.method(POST)
            .path("/cgi-bin/message/send")
            .query_param("access_token", "fresh");
        then.status(200).json_body(json!({"errcode": 0, "errmsg": "ok"}));
    });

    state.dispatcher.run("u1", "ping").await;

    stale_send.assert_calls(1);
    fresh_send.assert_calls(1);
    fresh_gettoken.assert_calls(1);
}

#[tokio::test]
async fn msgtest_skips_missing_assets_and_sends_the_rest() {
    let server = MockServer::start();
    let dir = tempfile::tempdir().expect("tempdir");
    let assets = tempfile::tempdir().expect("assets");
    std::fs::write(assets.path().join("goodluck.png"), vec![1u8; 256]).expect("png");
    std::fs::write(assets.path().join("record.csv"), b"id,name\n1,demo\n").expect("csv");

    let _gettoken = mock_gettoken(&server, "tok-1");
    let upload = server.mock(|when, then| {
        when.method(POST).path("/cgi-bin/media/upload");
        then.status(200)
            .json_body(json!({"errcode": 0, "errmsg": "ok", "media_id": "MEDIA"}));
    });
    let send = server.mock(|when, then| {
        when.method(POST).path("/cgi-bin/message/send");
        then.status(200).json_body(json!({"errcode": 0, "errmsg": "ok"}));
    });

    let mut config = config(&server, &dir);
    config.commands.demo_asset_dir = assets.path().to_string_lossy().to_string();
    let state = AppState::new(config).expect("state");
    state.dispatcher.run("u1", "msgtest").await;

    // voice.amr 与 video.mp4 不存在，校验失败后其余消息继续发送。
    upload.assert_calls(2);
    send.assert_calls(7);
}
