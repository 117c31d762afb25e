//! Client for the vendor's calling REST API.
//!
//! [`CallingApi`] is the seam the session lifecycle depends on;
//! [`HttpCallingApi`] is the `reqwest` implementation used in production.

use crate::{
    error::CallError,
    record::{AgentSummary, CallRecord},
};
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

/// The process-wide API credential. Injected once at startup and passed
/// explicitly to whoever needs it.
pub type ApiCredential = SecretString;

/// Result of registering a web call. Either field may come back empty when
/// the backend returns a malformed payload; the session rejects those.
#[derive(Debug, Clone)]
pub struct WebCallRegistration {
    pub call_id: String,
    pub access_token: SecretString,
}

impl WebCallRegistration {
    pub fn is_complete(&self) -> bool {
        !self.call_id.trim().is_empty() && !self.access_token.expose_secret().is_empty()
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CallingApi: Send + Sync {
    /// Registers a browser web call for `agent_id`.
    ///
    /// Fails with `Validation` for an unknown agent, `Auth` when the
    /// credential is rejected, `Service` otherwise.
    async fn register_web_call(&self, agent_id: &str) -> Result<WebCallRegistration, CallError>;

    /// Fetches the authoritative record. Fails with `NotFound` or `Service`.
    async fn get_call_record(&self, call_id: &str) -> Result<CallRecord, CallError>;

    async fn list_agents(&self) -> Result<Vec<AgentSummary>, CallError>;
}

#[derive(Deserialize)]
struct RawRegistration {
    #[serde(default)]
    call_id: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

/// `CallingApi` over the vendor's REST endpoints.
pub struct HttpCallingApi {
    client: reqwest::Client,
    base_url: String,
    credential: ApiCredential,
}

impl HttpCallingApi {
    /// Creates a client rooted at `base_url` (e.g. `https://api.retellai.com`).
    pub fn new(base_url: impl Into<String>, credential: ApiCredential) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credential,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// `{base}/v2/get-call/{call_id}` with the id escaped as a single path
    /// segment, so an id can never reach another endpoint or add a query.
    fn call_url(&self, call_id: &str) -> Result<Url, CallError> {
        if call_id.is_empty() || call_id == "." || call_id == ".." {
            return Err(CallError::NotFound(format!("call `{}`", call_id)));
        }
        let mut url = Url::parse(&self.url("/v2/get-call"))
            .map_err(|e| CallError::Service(format!("invalid calling API url: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| CallError::Service("calling API url cannot have a path".into()))?
            .push(call_id);
        Ok(url)
    }

    /// The only place the credential leaves the process.
    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(self.credential.expose_secret())
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, CallError> {
        let response = self.authorized(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(error_for_status(status, &body))
    }
}

/// Maps a non-success HTTP status to the error taxonomy.
pub(crate) fn error_for_status(status: StatusCode, body: &str) -> CallError {
    let detail = if body.trim().is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, body.trim())
    };
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CallError::Auth(detail),
        StatusCode::NOT_FOUND => CallError::NotFound(detail),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => CallError::Validation(detail),
        _ => CallError::Service(detail),
    }
}

#[async_trait]
impl CallingApi for HttpCallingApi {
    async fn register_web_call(&self, agent_id: &str) -> Result<WebCallRegistration, CallError> {
        debug!(%agent_id, "Registering web call");
        let request = self
            .client
            .post(self.url("/v2/create-web-call"))
            .json(&json!({ "agent_id": agent_id }));
        let raw: RawRegistration = self
            .send(request)
            .await
            .map_err(|e| match e {
                CallError::NotFound(detail) => {
                    CallError::Validation(format!("unknown agent `{}`: {}", agent_id, detail))
                }
                other => other,
            })?
            .json()
            .await?;
        Ok(WebCallRegistration {
            call_id: raw.call_id.unwrap_or_default(),
            access_token: SecretString::from(raw.access_token.unwrap_or_default()),
        })
    }

    async fn get_call_record(&self, call_id: &str) -> Result<CallRecord, CallError> {
        let request = self.client.get(self.call_url(call_id)?);
        let record = self
            .send(request)
            .await
            .map_err(|e| match e {
                CallError::NotFound(_) => CallError::NotFound(format!("call `{}`", call_id)),
                CallError::Validation(detail) => CallError::Service(detail),
                other => other,
            })?
            .json()
            .await?;
        Ok(record)
    }

    async fn list_agents(&self) -> Result<Vec<AgentSummary>, CallError> {
        let agents = self
            .send(self.client.get(self.url("/list-agents")))
            .await?
            .json()
            .await?;
        Ok(agents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_for_status_taxonomy() {
        assert!(matches!(
            error_for_status(StatusCode::UNAUTHORIZED, ""),
            CallError::Auth(_)
        ));
        assert!(matches!(
            error_for_status(StatusCode::FORBIDDEN, "bad key"),
            CallError::Auth(_)
        ));
        assert!(matches!(
            error_for_status(StatusCode::NOT_FOUND, ""),
            CallError::NotFound(_)
        ));
        assert!(matches!(
            error_for_status(StatusCode::UNPROCESSABLE_ENTITY, "agent_id invalid"),
            CallError::Validation(_)
        ));
        assert!(matches!(
            error_for_status(StatusCode::BAD_GATEWAY, ""),
            CallError::Service(_)
        ));
    }

    #[test]
    fn test_error_detail_includes_body() {
        let err = error_for_status(StatusCode::INTERNAL_SERVER_ERROR, " upstream down \n");
        assert_eq!(
            err,
            CallError::Service("500 Internal Server Error: upstream down".to_string())
        );
    }

    #[test]
    fn test_url_joining() {
        let api = HttpCallingApi::new("https://api.example.com/", SecretString::from("key"));
        assert_eq!(
            api.url("/v2/get-call/call_1"),
            "https://api.example.com/v2/get-call/call_1"
        );
    }

    #[test]
    fn test_call_id_stays_one_path_segment() {
        let api = HttpCallingApi::new("https://api.example.com", SecretString::from("key"));
        assert_eq!(
            api.call_url("call_1").unwrap().as_str(),
            "https://api.example.com/v2/get-call/call_1"
        );
        assert_eq!(
            api.call_url("../list-agents").unwrap().as_str(),
            "https://api.example.com/v2/get-call/..%2Flist-agents"
        );
        assert_eq!(
            api.call_url("x?y=z#frag").unwrap().as_str(),
            "https://api.example.com/v2/get-call/x%3Fy=z%23frag"
        );
        assert!(matches!(api.call_url(".."), Err(CallError::NotFound(_))));
        assert!(matches!(api.call_url(""), Err(CallError::NotFound(_))));
    }

    #[test]
    fn test_registration_completeness() {
        let complete = WebCallRegistration {
            call_id: "call_1".into(),
            access_token: SecretString::from("tok"),
        };
        let missing_token = WebCallRegistration {
            call_id: "call_1".into(),
            access_token: SecretString::from(""),
        };
        let missing_id = WebCallRegistration {
            call_id: " ".into(),
            access_token: SecretString::from("tok"),
        };
        assert!(complete.is_complete());
        assert!(!missing_token.is_complete());
        assert!(!missing_id.is_complete());
    }

    #[test]
    fn test_raw_registration_tolerates_missing_fields() {
        let raw: RawRegistration = serde_json::from_str(r#"{"call_id":"call_1"}"#).unwrap();
        assert_eq!(raw.call_id.as_deref(), Some("call_1"));
        assert!(raw.access_token.is_none());
    }
}
