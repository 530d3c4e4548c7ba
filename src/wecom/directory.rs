// 通讯录只读查询，返回企业微信原始 JSON。
use crate::wecom::delivery::WecomSender;
use crate::wecom::error::WecomResult;
use serde_json::Value;

const USER_GET_PATH: &str = "/cgi-bin/user/get";
const USER_SIMPLELIST_PATH: &str = "/cgi-bin/user/simplelist";
const DEPARTMENT_LIST_PATH: &str = "/cgi-bin/department/list";

impl WecomSender {
    pub async fn get_user_info(&self, user_id: &str) -> WecomResult<Value> {
        self.transport()
            .get_authorized(USER_GET_PATH, &[("userid", user_id)])
            .await
    }

    pub async fn list_department_users(
        &self,
        department_id: u64,
        fetch_child: bool,
    ) -> WecomResult<Value> {
        let department_id = department_id.to_string();
        let fetch_child = if fetch_child { "1" } else { "0" };
        self.transport()
            .get_authorized(
                USER_SIMPLELIST_PATH,
                &[
                    ("department_id", department_id.as_str()),
                    ("fetch_child", fetch_child),
                ],
            )
            .await
    }

    /// 不指定部门时返回全量部门列表。
    pub async fn list_departments(&self, department_id: Option<u64>) -> WecomResult<Value> {
        match department_id {
            Some(id) => {
                let id = id.to_string();
                self.transport()
                    .get_authorized(DEPARTMENT_LIST_PATH, &[("id", id.as_str())])
                    .await
            }
            None => self.transport().get_authorized(DEPARTMENT_LIST_PATH, &[]).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::DeliveryConfig;
    use crate::wecom::credential_store::{Credentials, MemoryCredentialStore};
    use crate::wecom::delivery::WecomSender;
    use crate::wecom::error::WecomError;
    use crate::wecom::token::TokenManager;
    use crate::wecom::transport::{vendor_code, VendorHttp, VendorTransport};
    use httpmock::prelude::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn sender(server: &MockServer) -> WecomSender {
        let delivery = DeliveryConfig::default();
        let http = VendorHttp::new(
            &server.base_url(),
            Duration::from_secs(5),
            delivery.auth_invalid_codes.clone(),
        )
        .expect("http");
        let tokens = Arc::new(TokenManager::new(
            http.clone(),
            Arc::new(MemoryCredentialStore::new()),
            7200,
        ));
        let transport =
            VendorTransport::new(http, tokens, Credentials::new("corp", "secret"), &delivery);
        WecomSender::new(transport, "1000002")
    }

    fn mock_gettoken(server: &MockServer) {
        server.mock(|when, then| {
            when.method(GET)
                .path("/cgi-bin/gettoken")
                .query_param("corpid", "corp")
                .query_param("corpsecret", "secret");
            then.status(200)
                .json_body(json!({"errcode": 0, "access_token": "tok", "expires_in": 7200}));
        });
    }

    #[tokio::test]
    async fn user_lookup_is_authorized_and_raw() {
        let server = MockServer::start();
        mock_gettoken(&server);
        let user = server.mock(|when, then| {
            when.method(GET)
                .path("/cgi-bin/user/get")
                .query_param("access_token", "tok")
                .query_param("userid", "zhangsan");
            then.status(200)
                .json_body(json!({"errcode": 0, "userid": "zhangsan", "name": "张三"}));
        });

        let body = sender(&server).get_user_info("zhangsan").await.expect("user");
        assert_eq!(body["name"], json!("张三"));
        user.assert_calls(1);
    }

    #[tokio::test]
    async fn department_queries_pass_parameters() {
        let server = MockServer::start();
        mock_gettoken(&server);
        let members = server.mock(|when, then| {
            when.method(GET)
                .path("/cgi-bin/user/simplelist")
                .query_param("department_id", "2")
                .query_param("fetch_child", "1");
            then.status(200)
                .json_body(json!({"errcode": 0, "userlist": [{"userid": "u1"}]}));
        });
        let departments = server.mock(|when, then| {
            when.method(GET)
                .path("/cgi-bin/department/list")
                .query_param_missing("id");
            then.status(200)
                .json_body(json!({"errcode": 60011, "errmsg": "no privilege"}));
        });

        let sender = sender(&server);
        let body = sender.list_department_users(2, true).await.expect("members");
        assert_eq!(body["userlist"][0]["userid"], json!("u1"));
        let body = sender.list_departments(None).await.expect("raw result");
        assert_eq!(vendor_code(&body), 60011);
        members.assert_calls(1);
        departments.assert_calls(1);
    }

    #[tokio::test]
    async fn bad_credentials_surface_as_authentication_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/cgi-bin/gettoken");
            then.status(200)
                .json_body(json!({"errcode": 40001, "errmsg": "invalid credential"}));
        });
        let err = sender(&server)
            .get_user_info("u1")
            .await
            .expect_err("auth error");
        assert!(matches!(err, WecomError::Authentication { code: 40001, .. }));
    }
}
