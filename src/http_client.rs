use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

/// Body of a `POST <apiBase>/v1/sessions/<id>/append` request.
#[derive(Debug, Clone, Serialize)]
pub struct AppendRequest {
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: Value,
    pub actor: String,
    pub producer_id: String,
    pub producer_seq: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refs: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_seq: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppendResponse {
    pub seq: u64,
    pub last_seq: u64,
    pub deduped: bool,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// External append endpoint, kept behind a trait so tests can substitute an
/// in-process fake instead of driving a real `reqwest::Client`.
#[async_trait]
pub trait AppendClient: Send + Sync {
    async fn append(
        &self,
        session_id: &str,
        token: &str,
        request: &AppendRequest,
    ) -> Result<AppendResponse, Error>;
}

/// Default [`AppendClient`] backed by `reqwest`.
pub struct ReqwestAppendClient {
    client: reqwest::Client,
    api_base: String,
}

impl ReqwestAppendClient {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into(),
        }
    }

    pub fn with_client(client: reqwest::Client, api_base: impl Into<String>) -> Self {
        Self {
            client,
            api_base: api_base.into(),
        }
    }
}

#[async_trait]
impl AppendClient for ReqwestAppendClient {
    async fn append(
        &self,
        session_id: &str,
        token: &str,
        request: &AppendRequest,
    ) -> Result<AppendResponse, Error> {
        let url = format!(
            "{}/v1/sessions/{}/append",
            self.api_base.trim_end_matches('/'),
            urlencoding_path_segment(session_id)
        );

        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(response.json::<AppendResponse>().await?)
        } else {
            let status_code = status.as_u16();
            let body: ApiErrorBody = response.json().await.unwrap_or(ApiErrorBody {
                error: None,
                message: None,
            });
            Err(Error::Api {
                status: status_code,
                code: body.error,
                message: body.message.unwrap_or_else(|| status.to_string()),
            })
        }
    }
}

fn urlencoding_path_segment(segment: &str) -> String {
    let mut url = url::Url::parse("http://placeholder.invalid").expect("static base url parses");
    url.path_segments_mut()
        .expect("static base url is not cannot-be-a-base")
        .push(segment);
    url.path()
        .rsplit('/')
        .next()
        .unwrap_or(segment)
        .to_string()
}
