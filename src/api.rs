use std::future::Future;

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::auth::ApiToken;
use crate::config::Config;
use crate::history::HistorySource;
use crate::models::{
    Attachment, DirectMessagePage, DmChat, Envelope, ErrorEnvelope, Group, GroupDetails, GroupMessagePage, ImageUploadResponse,
    Message, OutgoingMessage, SendPayload, SentDirectMessage, SentGroupMessage, User,
};

const USER_AGENT: &str = concat!("groupme-cli/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("authentication failed (HTTP {status}): {message}. Rotate your GroupMe token and try again.")]
    Auth { status: u16, message: String },
    #[error("network error for {url}: {message}. Check your connection and retry.")]
    Network { url: String, message: String },
    #[error("api error (HTTP {status}) for {url}: {message}")]
    Api { status: u16, url: String, message: String },
}

#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Json(Value),
    Bytes { content_type: String, data: Vec<u8> },
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(&'static str, String)>,
    pub body: RequestBody,
}

impl HttpRequest {
    fn new(method: Method, url: String) -> Self {
        Self {
            method,
            url,
            query: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    fn query(mut self, key: &'static str, value: impl ToString) -> Self {
        self.query.push((key, value.to_string()));
        self
    }

    fn optional_query(self, key: &'static str, value: Option<impl ToString>) -> Self {
        match value {
            Some(value) => self.query(key, value),
            None => self,
        }
    }

    fn body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Sends a fully built request and hands back the raw status and body.
/// Authentication is the transport's concern so request values never carry
/// the token.
pub trait Transport {
    fn execute(&self, request: HttpRequest) -> impl Future<Output = Result<HttpResponse, ApiError>>;
}

pub struct ReqwestTransport {
    http: Client,
    token: ApiToken,
}

impl ReqwestTransport {
    pub fn new(token: ApiToken, config: &Config) -> Result<Self, ApiError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| ApiError::Network {
                url: config.api_base_url.clone(),
                message: format!("could not build http client: {err}"),
            })?;
        Ok(Self { http, token })
    }
}

impl Transport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        let HttpRequest {
            method,
            url,
            query,
            body,
        } = request;

        let mut builder = self
            .http
            .request(method, &url)
            .bearer_auth(self.token.expose())
            .header("X-Access-Token", self.token.expose())
            .header(ACCEPT, "application/json");
        if !query.is_empty() {
            builder = builder.query(&query);
        }
        builder = match body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Bytes { content_type, data } => builder.header(CONTENT_TYPE, content_type).body(data),
        };

        let network_error = |err: reqwest::Error| ApiError::Network {
            url: url.clone(),
            message: err.without_url().to_string(),
        };
        let response = builder.send().await.map_err(network_error)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(network_error)?;
        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}

/// Result of a send: either the payload that a dry run would have posted or
/// the message the service created.
#[derive(Debug)]
pub enum SendOutcome {
    DryRun(SendPayload),
    Sent(Message),
}

pub struct ApiClient<T = ReqwestTransport> {
    transport: T,
    api_base_url: String,
    image_base_url: String,
}

impl ApiClient<ReqwestTransport> {
    pub fn from_config(config: &Config, token: ApiToken) -> Result<Self, ApiError> {
        let transport = ReqwestTransport::new(token, config)?;
        Ok(Self::with_transport(transport, config))
    }
}

impl<T: Transport> ApiClient<T> {
    pub fn with_transport(transport: T, config: &Config) -> Self {
        Self {
            transport,
            api_base_url: config.api_base_url.clone(),
            image_base_url: config.image_base_url.clone(),
        }
    }

    pub async fn list_groups(&self, page: Option<u32>, per_page: Option<u32>) -> Result<Vec<Group>, ApiError> {
        let request = HttpRequest::new(Method::GET, self.api_url("/groups"))
            .optional_query("page", page)
            .optional_query("per_page", per_page);
        Ok(self.call::<Vec<Group>>(request).await?.unwrap_or_default())
    }

    /// Walks `page=1,2,...` until the service returns an empty page.
    pub async fn list_all_groups(&self) -> Result<Vec<Group>, ApiError> {
        let mut groups = Vec::new();
        let mut page = 1;
        loop {
            let batch = self.list_groups(Some(page), None).await?;
            if batch.is_empty() {
                break;
            }
            groups.extend(batch);
            page += 1;
        }
        Ok(groups)
    }

    pub async fn list_former_groups(&self, page: Option<u32>, per_page: Option<u32>) -> Result<Vec<Group>, ApiError> {
        let request = HttpRequest::new(Method::GET, self.api_url("/groups/former"))
            .optional_query("page", page)
            .optional_query("per_page", per_page);
        Ok(self.call::<Vec<Group>>(request).await?.unwrap_or_default())
    }

    pub async fn group(&self, group_id: &str) -> Result<GroupDetails, ApiError> {
        let url = self.api_url(&format!("/groups/{group_id}"));
        self.call::<GroupDetails>(HttpRequest::new(Method::GET, url.clone()))
            .await?
            .ok_or_else(|| missing_response(&url))
    }

    /// Server-side search within one group. Results come back in the order
    /// the service ranks them.
    pub async fn search_group_messages(&self, group_id: &str, query: &str) -> Result<Vec<Message>, ApiError> {
        let request = HttpRequest::new(Method::GET, self.api_url(&format!("/groups/{group_id}/messages/search")))
            .query("query", query);
        let page = self.call::<GroupMessagePage>(request).await?.unwrap_or_default();
        Ok(page.messages)
    }

    /// One page of history, newest first. HTTP 304 means nothing older than
    /// the cursor and comes back as an empty page.
    pub async fn message_page(
        &self,
        source: &HistorySource,
        limit: usize,
        before_id: Option<&str>,
    ) -> Result<Vec<Message>, ApiError> {
        match source {
            HistorySource::Group(group_id) => {
                let request = HttpRequest::new(Method::GET, self.api_url(&format!("/groups/{group_id}/messages")))
                    .query("limit", limit)
                    .optional_query("before_id", before_id);
                let page = self.call::<GroupMessagePage>(request).await?.unwrap_or_default();
                Ok(page.messages)
            }
            HistorySource::Direct(_) | HistorySource::AllDirect => {
                let other_user_id = match source {
                    HistorySource::Direct(user_id) => Some(user_id.as_str()),
                    _ => None,
                };
                let request = HttpRequest::new(Method::GET, self.api_url("/direct_messages"))
                    .optional_query("other_user_id", other_user_id)
                    .query("limit", limit)
                    .optional_query("before_id", before_id);
                let page = self.call::<DirectMessagePage>(request).await?.unwrap_or_default();
                Ok(page.direct_messages)
            }
        }
    }

    pub async fn send_message(
        &self,
        group_id: &str,
        text: &str,
        attachments: Vec<Attachment>,
        dry_run: bool,
    ) -> Result<SendOutcome, ApiError> {
        let payload = SendPayload::Group(outgoing_message(None, text, attachments));
        if dry_run {
            return Ok(SendOutcome::DryRun(payload));
        }

        let url = self.api_url(&format!("/groups/{group_id}/messages"));
        let request = HttpRequest::new(Method::POST, url.clone()).body(json_body(&payload)?);
        let sent = self
            .call::<SentGroupMessage>(request)
            .await?
            .ok_or_else(|| missing_response(&url))?;
        Ok(SendOutcome::Sent(sent.message))
    }

    pub async fn list_dm_chats(&self, page: Option<u32>, per_page: Option<u32>) -> Result<Vec<DmChat>, ApiError> {
        let request = HttpRequest::new(Method::GET, self.api_url("/chats"))
            .optional_query("page", page)
            .optional_query("per_page", per_page);
        Ok(self.call::<Vec<DmChat>>(request).await?.unwrap_or_default())
    }

    pub async fn send_direct_message(
        &self,
        user_id: &str,
        text: &str,
        attachments: Vec<Attachment>,
        dry_run: bool,
    ) -> Result<SendOutcome, ApiError> {
        let payload = SendPayload::Direct(outgoing_message(Some(user_id), text, attachments));
        if dry_run {
            return Ok(SendOutcome::DryRun(payload));
        }

        let url = self.api_url("/direct_messages");
        let request = HttpRequest::new(Method::POST, url.clone()).body(json_body(&payload)?);
        let sent = self
            .call::<SentDirectMessage>(request)
            .await?
            .ok_or_else(|| missing_response(&url))?;
        Ok(SendOutcome::Sent(sent.direct_message))
    }

    /// Uploads raw image bytes to the image service and returns the hosted URL.
    pub async fn upload_image(&self, data: Vec<u8>, content_type: &str) -> Result<String, ApiError> {
        let url = format!("{}/pictures", self.image_base_url);
        let request = HttpRequest::new(Method::POST, url.clone()).body(RequestBody::Bytes {
            content_type: content_type.to_string(),
            data,
        });
        debug!(url = %url, content_type, "uploading image");
        let response = self.transport.execute(request).await?;
        check_status(&url, &response).map_err(|err| match err {
            ApiError::Api { status, url, message } => ApiError::Api {
                status,
                url,
                message: format!("image upload rejected: {message}"),
            },
            other => other,
        })?;

        let parsed: ImageUploadResponse = serde_json::from_slice(&response.body)
            .map_err(|err| invalid_body(response.status, &url, &err))?;
        Ok(parsed.payload.url)
    }

    pub async fn me(&self) -> Result<User, ApiError> {
        let url = self.api_url("/users/me");
        self.call::<User>(HttpRequest::new(Method::GET, url.clone()))
            .await?
            .ok_or_else(|| missing_response(&url))
    }

    pub async fn like_message(&self, conversation_id: &str, message_id: &str) -> Result<(), ApiError> {
        let url = self.api_url(&format!("/messages/{conversation_id}/{message_id}/like"));
        self.call::<Value>(HttpRequest::new(Method::POST, url)).await?;
        Ok(())
    }

    pub async fn unlike_message(&self, conversation_id: &str, message_id: &str) -> Result<(), ApiError> {
        let url = self.api_url(&format!("/messages/{conversation_id}/{message_id}/unlike"));
        self.call::<Value>(HttpRequest::new(Method::POST, url)).await?;
        Ok(())
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.api_base_url, path)
    }

    /// Executes a request against the REST API and unwraps the `response`
    /// member of the envelope. `None` means the service had nothing to return
    /// (HTTP 304, an empty body, or `"response": null`).
    async fn call<R: DeserializeOwned>(&self, request: HttpRequest) -> Result<Option<R>, ApiError> {
        let url = request.url.clone();
        debug!(method = %request.method, url = %url, query = ?request.query, "api request");
        let response = self.transport.execute(request).await?;
        debug!(status = response.status, bytes = response.body.len(), "api response");

        if response.status == 304 {
            return Ok(None);
        }
        check_status(&url, &response)?;
        if response.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        let envelope: Envelope<R> =
            serde_json::from_slice(&response.body).map_err(|err| invalid_body(response.status, &url, &err))?;
        Ok(envelope.response)
    }
}

fn outgoing_message(recipient_id: Option<&str>, text: &str, attachments: Vec<Attachment>) -> OutgoingMessage {
    OutgoingMessage {
        source_guid: Uuid::new_v4().to_string(),
        recipient_id: recipient_id.map(str::to_string),
        text: text.to_string(),
        attachments,
    }
}

fn json_body(payload: &SendPayload) -> Result<RequestBody, ApiError> {
    serde_json::to_value(payload)
        .map(RequestBody::Json)
        .map_err(|err| ApiError::Api {
            status: 0,
            url: String::new(),
            message: format!("could not encode payload: {err}"),
        })
}

fn check_status(url: &str, response: &HttpResponse) -> Result<(), ApiError> {
    match response.status {
        200..=299 => Ok(()),
        status @ (401 | 403) => Err(ApiError::Auth {
            status,
            message: error_message(&response.body),
        }),
        status => Err(ApiError::Api {
            status,
            url: url.to_string(),
            message: error_message(&response.body),
        }),
    }
}

fn error_message(body: &[u8]) -> String {
    if let Ok(envelope) = serde_json::from_slice::<ErrorEnvelope>(body) {
        if !envelope.errors.is_empty() {
            return envelope.errors.join("; ");
        }
        if let Some(meta) = envelope.meta {
            if !meta.errors.is_empty() {
                return meta.errors.join("; ");
            }
            if let Some(message) = meta.message.filter(|message| !message.trim().is_empty()) {
                return message;
            }
        }
    }

    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        return "no details from service".to_string();
    }
    text.chars().take(200).collect()
}

fn invalid_body(status: u16, url: &str, err: &serde_json::Error) -> ApiError {
    ApiError::Api {
        status,
        url: url.to_string(),
        message: format!("unexpected response body: {err}"),
    }
}

fn missing_response(url: &str) -> ApiError {
    ApiError::Api {
        status: 200,
        url: url.to_string(),
        message: "response was empty".to_string(),
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::Mutex;

    use serde_json::{Value, json};

    use super::{ApiClient, ApiError, HttpRequest, HttpResponse, Transport};
    use crate::config::Config;

    type Handler = Box<dyn Fn(&HttpRequest) -> Result<HttpResponse, ApiError>>;

    /// In-memory transport that records every request it receives.
    pub struct FakeTransport {
        handler: Handler,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl FakeTransport {
        pub fn new(handler: impl Fn(&HttpRequest) -> Result<HttpResponse, ApiError> + 'static) -> Self {
            Self {
                handler: Box::new(handler),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn requests(&self) -> Vec<HttpRequest> {
            self.requests.lock().expect("requests lock").clone()
        }
    }

    impl Transport for &FakeTransport {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
            let response = (self.handler)(&request);
            self.requests.lock().expect("requests lock").push(request);
            response
        }
    }

    pub fn config() -> Config {
        Config::from_lookup(|key| match key {
            "GROUPME_API_BASE_URL" => Some("https://api.example.test/v3".to_string()),
            "GROUPME_IMAGE_BASE_URL" => Some("https://image.example.test".to_string()),
            "HOME" => Some("/nonexistent".to_string()),
            _ => None,
        })
        .expect("test config")
    }

    pub fn client(transport: &FakeTransport) -> ApiClient<&FakeTransport> {
        ApiClient::with_transport(transport, &config())
    }

    pub fn ok(response: Value) -> Result<HttpResponse, ApiError> {
        Ok(json_response(200, json!({"meta": {"code": 200}, "response": response})))
    }

    pub fn json_response(status: u16, body: Value) -> HttpResponse {
        HttpResponse {
            status,
            body: serde_json::to_vec(&body).expect("json body"),
        }
    }

    pub fn query_value<'a>(request: &'a HttpRequest, key: &str) -> Option<&'a str> {
        request
            .query
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, value)| value.as_str())
    }
}
