//! HTTP implementation of the scribe backend API
//!
//! Every request carries the bearer token from [`AuthHandle`]. Requests are
//! refused locally while no token is available.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{ApiResult, ScribeApi};
use crate::auth::AuthHandle;
use crate::error::{ApplicationError, FieldError};
use crate::models::{
    AudioBlob, DraftNote, Encounter, EncounterChanges, EncounterPage, ExternalChanges,
    GeneratedNote, NoteType, OutputType, SampleRecording, Transcription, UserInfo,
};
use crate::request::cancellable;

/// Default timeout for ordinary API requests
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound for task and upload requests; callers enforce their own deadline
const TASK_TIMEOUT: Duration = Duration::from_secs(600);

/// Connection establishment timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// FastAPI-style validation error body
#[derive(Debug, Deserialize)]
struct ValidationBody {
    detail: ValidationDetail,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ValidationDetail {
    Fields(Vec<ValidationItem>),
    Message(String),
}

#[derive(Debug, Deserialize)]
struct ValidationItem {
    #[serde(default)]
    loc: Vec<serde_json::Value>,
    msg: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DraftNoteRequest<'a> {
    definition_id: &'a str,
    note_id: &'a str,
    title: &'a str,
    content: &'a str,
    output_type: OutputType,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NoteFlagRequest<'a> {
    is_flagged: bool,
    comments: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NoteDefinitionRequest<'a> {
    title: &'a str,
    instructions: &'a str,
    model: Option<&'a str>,
    output_type: OutputType,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    instructions: &'a str,
    transcript: &'a str,
    output_type: OutputType,
}

/// Scribe backend client
#[derive(Debug, Clone)]
pub struct HttpApiClient {
    http_client: reqwest::Client,
    base_url: String,
    auth: AuthHandle,
}

impl HttpApiClient {
    /// Create a client for `base_url` with URL validation
    pub fn new(base_url: &str, auth: AuthHandle) -> Result<Self, ApplicationError> {
        Self::with_timeout(base_url, auth, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: &str,
        auth: AuthHandle,
        timeout: Duration,
    ) -> Result<Self, ApplicationError> {
        let cleaned_url = base_url.trim_end_matches('/');

        let parsed = url::Url::parse(cleaned_url).map_err(|e| {
            ApplicationError::Configuration(format!("Invalid API URL '{}': {}", cleaned_url, e))
        })?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ApplicationError::Configuration(format!(
                "API URL must use http or https scheme, got: {}",
                parsed.scheme()
            )));
        }

        // Credentials belong in the bearer token, never in the URL
        if !parsed.username().is_empty() || parsed.password().is_some() {
            return Err(ApplicationError::Configuration(
                "API URL must not contain credentials".to_string(),
            ));
        }

        let http_client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .build()
            .map_err(|e| {
                ApplicationError::Configuration(format!("Failed to create HTTP client: {}", e))
            })?;

        debug!("HttpApiClient created for {}", cleaned_url);

        Ok(Self {
            http_client,
            base_url: cleaned_url.to_string(),
            auth,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn bearer(&self) -> Result<String, ApplicationError> {
        self.auth.token().ok_or_else(|| {
            ApplicationError::RequestRejected("No access token available".to_string())
        })
    }

    /// Attach auth and send
    async fn send(&self, request: RequestBuilder) -> ApiResult<Response> {
        let token = self.bearer()?;
        request
            .bearer_auth(token)
            .send()
            .await
            .map_err(ApplicationError::from)
    }

    /// Send, check the status and read the body, all under the cancellation token
    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        cancel: Option<&CancellationToken>,
    ) -> ApiResult<T> {
        let exchange = async {
            let response = check_status(self.send(request).await?).await?;
            let body = response.bytes().await.map_err(ApplicationError::from)?;
            Ok::<T, ApplicationError>(serde_json::from_slice(&body)?)
        };
        match cancel {
            Some(cancel) => cancellable(exchange, cancel).await,
            None => exchange.await,
        }
    }

    async fn send_empty(&self, request: RequestBuilder) -> ApiResult<()> {
        check_status(self.send(request).await?).await?;
        Ok(())
    }
}

fn audio_part(audio: &AudioBlob) -> ApiResult<Part> {
    Part::bytes(audio.bytes.clone())
        .file_name(audio.filename.clone())
        .mime_str(&audio.content_type)
        .map_err(|e| ApplicationError::BadRequest(format!("Invalid audio content type: {}", e)))
}

fn timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Map a non-success response onto the error taxonomy
async fn check_status(response: Response) -> ApiResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    warn!(status = %status, "Scribe API request failed");
    Err(error_for_status(status, &body))
}

fn error_for_status(status: StatusCode, body: &str) -> ApplicationError {
    match status {
        StatusCode::BAD_REQUEST => ApplicationError::BadRequest(body.to_string()),
        StatusCode::UNAUTHORIZED
        | StatusCode::FORBIDDEN
        | StatusCode::NOT_FOUND
        | StatusCode::CONFLICT => {
            ApplicationError::RequestRejected(format!("{}: {}", status, body))
        }
        StatusCode::UNPROCESSABLE_ENTITY => parse_validation(body),
        StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY => {
            ApplicationError::ServerUnavailable(status.to_string())
        }
        StatusCode::GATEWAY_TIMEOUT => ApplicationError::ServerTimedOut(status.to_string()),
        s if s.is_server_error() => ApplicationError::ServerError(format!("{}: {}", status, body)),
        _ => ApplicationError::Unexpected(format!("Unexpected response {}: {}", status, body)),
    }
}

fn parse_validation(body: &str) -> ApplicationError {
    match serde_json::from_str::<ValidationBody>(body) {
        Ok(ValidationBody {
            detail: ValidationDetail::Fields(items),
        }) => ApplicationError::Validation(
            items
                .into_iter()
                .map(|item| FieldError {
                    field: item
                        .loc
                        .iter()
                        .filter_map(|v| match v {
                            serde_json::Value::String(s) if s != "body" => Some(s.clone()),
                            serde_json::Value::Number(n) => Some(n.to_string()),
                            _ => None,
                        })
                        .collect::<Vec<_>>()
                        .join("."),
                    message: item.msg,
                })
                .collect(),
        ),
        Ok(ValidationBody {
            detail: ValidationDetail::Message(message),
        }) => ApplicationError::Validation(vec![FieldError {
            field: String::new(),
            message,
        }]),
        Err(_) => ApplicationError::Validation(vec![FieldError {
            field: String::new(),
            message: body.to_string(),
        }]),
    }
}

#[async_trait]
impl ScribeApi for HttpApiClient {
    async fn get_encounters(
        &self,
        earlier_than: Option<DateTime<Utc>>,
        cancel: &CancellationToken,
    ) -> ApiResult<EncounterPage> {
        let mut request = self.http_client.get(self.url("/encounters"));
        if let Some(cursor) = earlier_than {
            request = request.query(&[("earlierThan", timestamp(&cursor))]);
        }
        self.send_json(request, Some(cancel)).await
    }

    async fn create_encounter(
        &self,
        audio: &AudioBlob,
        context: Option<&str>,
        cancel: &CancellationToken,
    ) -> ApiResult<Encounter> {
        let mut form = Form::new().part("audio", audio_part(audio)?);
        if let Some(context) = context {
            form = form.text("context", context.to_string());
        }
        let request = self
            .http_client
            .post(self.url("/encounters"))
            .timeout(TASK_TIMEOUT)
            .multipart(form);
        self.send_json(request, Some(cancel)).await
    }

    async fn update_encounter(
        &self,
        id: &str,
        changes: &EncounterChanges,
        cancel: &CancellationToken,
    ) -> ApiResult<Encounter> {
        let request = self
            .http_client
            .patch(self.url(&format!("/encounters/{}", urlencoding::encode(id))))
            .json(changes);
        self.send_json(request, Some(cancel)).await
    }

    async fn append_audio(&self, id: &str, audio: &AudioBlob) -> ApiResult<Encounter> {
        let form = Form::new().part("audio", audio_part(audio)?);
        let request = self
            .http_client
            .post(self.url(&format!(
                "/encounters/{}/recording",
                urlencoding::encode(id)
            )))
            .timeout(TASK_TIMEOUT)
            .multipart(form);
        self.send_json(request, None).await
    }

    async fn delete_and_purge_encounter(&self, id: &str) -> ApiResult<()> {
        let request = self
            .http_client
            .delete(self.url(&format!("/encounters/{}", urlencoding::encode(id))))
            .query(&[("purge", "true")]);
        self.send_empty(request).await
    }

    async fn create_draft_note(&self, encounter_id: &str, note: &DraftNote) -> ApiResult<Encounter> {
        let body = DraftNoteRequest {
            definition_id: &note.definition_id,
            note_id: &note.id,
            title: &note.title,
            content: &note.content,
            output_type: note.output_type,
        };
        let request = self
            .http_client
            .post(self.url(&format!(
                "/encounters/{}/draft-notes",
                urlencoding::encode(encounter_id)
            )))
            .json(&body);
        self.send_json(request, None).await
    }

    async fn set_note_flag(
        &self,
        encounter_id: &str,
        note_id: &str,
        is_flagged: bool,
        comments: Option<&str>,
    ) -> ApiResult<()> {
        let request = self
            .http_client
            .patch(self.url(&format!(
                "/encounters/{}/draft-notes/{}",
                urlencoding::encode(encounter_id),
                urlencoding::encode(note_id)
            )))
            .json(&NoteFlagRequest {
                is_flagged,
                comments,
            });
        self.send_empty(request).await
    }

    async fn get_note_definitions(&self, cancel: &CancellationToken) -> ApiResult<Vec<NoteType>> {
        let request = self.http_client.get(self.url("/note-definitions"));
        self.send_json(request, Some(cancel)).await
    }

    async fn create_note_definition(&self, note_type: &NoteType) -> ApiResult<NoteType> {
        let request = self
            .http_client
            .post(self.url("/note-definitions"))
            .json(&NoteDefinitionRequest {
                title: &note_type.title,
                instructions: &note_type.instructions,
                model: note_type.model.as_deref(),
                output_type: note_type.output_type,
            });
        self.send_json(request, None).await
    }

    async fn update_note_definition(&self, note_type: &NoteType) -> ApiResult<NoteType> {
        let request = self
            .http_client
            .patch(self.url(&format!(
                "/note-definitions/{}",
                urlencoding::encode(&note_type.id)
            )))
            .json(&NoteDefinitionRequest {
                title: &note_type.title,
                instructions: &note_type.instructions,
                model: note_type.model.as_deref(),
                output_type: note_type.output_type,
            });
        self.send_json(request, None).await
    }

    async fn discard_note_definition(&self, id: &str) -> ApiResult<()> {
        let request = self
            .http_client
            .delete(self.url(&format!("/note-definitions/{}", urlencoding::encode(id))));
        self.send_empty(request).await
    }

    async fn get_user_info(&self, cancel: &CancellationToken) -> ApiResult<UserInfo> {
        let request = self.http_client.get(self.url("/user"));
        self.send_json(request, Some(cancel)).await
    }

    async fn set_default_note_type(&self, note_type_id: &str) -> ApiResult<()> {
        let request = self
            .http_client
            .patch(self.url("/user/settings"))
            .json(&serde_json::json!({ "defaultNoteType": note_type_id }));
        self.send_empty(request).await
    }

    async fn set_enabled_note_types(&self, note_type_ids: &[String]) -> ApiResult<()> {
        let request = self
            .http_client
            .patch(self.url("/user/settings"))
            .json(&serde_json::json!({ "enabledNoteTypes": note_type_ids }));
        self.send_empty(request).await
    }

    async fn get_sample_recordings(
        &self,
        cancel: &CancellationToken,
    ) -> ApiResult<Vec<SampleRecording>> {
        let request = self.http_client.get(self.url("/sample-recordings"));
        self.send_json(request, Some(cancel)).await
    }

    async fn download_sample_recording(&self, filename: &str) -> ApiResult<AudioBlob> {
        let request = self.http_client.get(self.url(&format!(
            "/sample-recordings/{}",
            urlencoding::encode(filename)
        )));
        let response = check_status(self.send(request).await?).await?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = response.bytes().await.map_err(ApplicationError::from)?;
        Ok(AudioBlob::new(bytes.to_vec(), &content_type, filename))
    }

    async fn check_data_changes(
        &self,
        cutoff: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> ApiResult<Option<ExternalChanges>> {
        let request = self
            .http_client
            .get(self.url("/monitoring/changes"))
            .query(&[("cutoff", timestamp(&cutoff))]);
        let exchange = async {
            let response = check_status(self.send(request).await?).await?;
            if response.status() == StatusCode::NO_CONTENT {
                return Ok::<_, ApplicationError>(None);
            }
            let body = response.bytes().await.map_err(ApplicationError::from)?;
            if body.is_empty() {
                return Ok(None);
            }
            Ok(serde_json::from_slice::<Option<ExternalChanges>>(&body)?)
        };
        cancellable(exchange, cancel).await
    }

    async fn transcribe_audio(
        &self,
        audio: &AudioBlob,
        cancel: &CancellationToken,
    ) -> ApiResult<Transcription> {
        let form = Form::new().part("audio", audio_part(audio)?);
        let request = self
            .http_client
            .post(self.url("/tasks/transcribe-audio"))
            .timeout(TASK_TIMEOUT)
            .multipart(form);
        self.send_json(request, Some(cancel)).await
    }

    async fn generate_draft_note(
        &self,
        instructions: &str,
        transcript: &str,
        output_type: OutputType,
        cancel: &CancellationToken,
    ) -> ApiResult<GeneratedNote> {
        let request = self
            .http_client
            .post(self.url("/tasks/generate-draft-note"))
            .timeout(TASK_TIMEOUT)
            .json(&GenerateRequest {
                instructions,
                transcript,
                output_type,
            });
        self.send_json(request, Some(cancel)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let auth = AuthHandle::new();
        let client = HttpApiClient::new("http://localhost:8000/api/", auth.clone()).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8000/api");

        assert!(HttpApiClient::new("not-a-url", auth.clone()).is_err());
        assert!(HttpApiClient::new("ftp://localhost:8000", auth.clone()).is_err());

        let err = HttpApiClient::new("https://user:pw@localhost", auth).unwrap_err();
        assert_eq!(err.name(), "Configuration Error");
    }

    #[tokio::test]
    async fn test_request_without_token_is_rejected() {
        let client = HttpApiClient::new("http://127.0.0.1:9", AuthHandle::new()).unwrap();
        let err = client
            .get_user_info(&CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.name(), "Request Rejected");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            error_for_status(StatusCode::BAD_REQUEST, "x").name(),
            "Bad Request"
        );
        assert_eq!(
            error_for_status(StatusCode::FORBIDDEN, "x").name(),
            "Request Rejected"
        );
        assert_eq!(
            error_for_status(StatusCode::SERVICE_UNAVAILABLE, "").name(),
            "Server Unavailable"
        );
        assert_eq!(
            error_for_status(StatusCode::GATEWAY_TIMEOUT, "").name(),
            "Server Timed Out"
        );
        assert_eq!(
            error_for_status(StatusCode::INTERNAL_SERVER_ERROR, "boom").name(),
            "Server Error"
        );
    }

    #[test]
    fn test_validation_body_parsing() {
        let body = r#"{"detail": [
            {"loc": ["body", "title"], "msg": "field required", "type": "missing"},
            {"loc": ["body", "instructions", 0], "msg": "too short", "type": "value_error"}
        ]}"#;
        match error_for_status(StatusCode::UNPROCESSABLE_ENTITY, body) {
            ApplicationError::Validation(errors) => {
                assert_eq!(errors.len(), 2);
                assert_eq!(errors[0].field, "title");
                assert_eq!(errors[0].message, "field required");
                assert_eq!(errors[1].field, "instructions.0");
            }
            other => panic!("expected validation error, got {:?}", other),
        }

        match error_for_status(StatusCode::UNPROCESSABLE_ENTITY, "not json") {
            ApplicationError::Validation(errors) => assert_eq!(errors[0].message, "not json"),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_timestamp_format() {
        use chrono::TimeZone;
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();
        assert_eq!(timestamp(&t), "2024-05-01T09:30:00.000Z");
    }

    #[tokio::test]
    async fn test_cancel_interrupts_slow_response_body() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 2048];
            let _ = socket.read(&mut buf).await;
            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 200\r\n\r\n{\"lastUpdate\"",
                )
                .await
                .unwrap();
            // Headers are out, the rest of the body never arrives
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let client = HttpApiClient::new(
            &format!("http://{}", addr),
            AuthHandle::with_token("token"),
        )
        .unwrap();
        let cancel = CancellationToken::new();
        let stopper = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                cancel.cancel();
            })
        };

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            client.check_data_changes(Utc::now(), &cancel),
        )
        .await
        .expect("change check outlived its cancellation");
        assert_eq!(result.unwrap_err().name(), "Request Aborted");

        stopper.await.unwrap();
        server.abort();
    }
}
