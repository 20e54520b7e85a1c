use axum::{
    extract::{FromRequest, Multipart, Path, Query, Request, State},
    http::{header, HeaderMap},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::{Path as FsPath, PathBuf};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::error::ApiError;
use super::AppState;
use crate::jobs::{Job, JobId, JobSettings, JobSource, JobStatus, JobSummary, Language};
use crate::jobs::registry::DEFAULT_LIST_LIMIT;
use crate::output::{ArtifactKind, OutputKind};
use crate::utils::sanitize_filename;

const MAX_LIST_LIMIT: usize = 500;

/// Settings accepted by both submission encodings; unset fields use defaults
#[derive(Debug, Default, Deserialize)]
pub struct SettingsInput {
    pub language: Option<Language>,
    pub model: Option<String>,
    pub output_kind: Option<OutputKind>,
    pub include_timestamps: Option<bool>,
    pub use_text_enhancement: Option<bool>,
}

impl SettingsInput {
    fn into_settings(self, default_model: &str) -> JobSettings {
        let defaults = JobSettings::default();
        JobSettings {
            language: self.language.unwrap_or(defaults.language),
            model: self
                .model
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| default_model.to_string()),
            output_kind: self.output_kind.unwrap_or(defaults.output_kind),
            include_timestamps: self.include_timestamps.unwrap_or(defaults.include_timestamps),
            use_text_enhancement: self.use_text_enhancement.unwrap_or(defaults.use_text_enhancement),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub items: Vec<JobSummary>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTranscriptionRequest {
    /// Path of a file already on the server
    pub file_path: Option<PathBuf>,
    pub url: Option<String>,
    #[serde(flatten)]
    pub settings: SettingsInput,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub id: JobId,
    pub status: JobStatus,
    pub progress: u8,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct DownloadParams {
    pub format: Option<String>,
}

struct Submission {
    source: JobSource,
    display_name: Option<String>,
    settings: JobSettings,
}

pub async fn create(State(state): State<AppState>, request: Request) -> Result<Json<SubmitResponse>, ApiError> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("multipart/form-data"));

    let submission = if is_multipart {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        read_multipart(&state, multipart).await?
    } else {
        let Json(body) = Json::<CreateTranscriptionRequest>::from_request(request, &state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;

        let source = JobSource::from_submission(body.file_path, body.url)?;
        Submission {
            source,
            display_name: None,
            settings: body.settings.into_settings(&state.config.whisper.default_model),
        }
    };

    let job = state
        .orchestrator
        .submit(submission.source, submission.display_name, submission.settings);

    Ok(Json(SubmitResponse {
        id: job.id().clone(),
        status: job.status(),
        progress: job.progress(),
    }))
}

async fn read_multipart(state: &AppState, mut multipart: Multipart) -> Result<Submission, ApiError> {
    let mut upload: Option<(PathBuf, String)> = None;
    let mut url = None;
    let mut text_fields: Vec<(String, String)> = Vec::new();

    let result: Result<(), ApiError> = async {
        while let Some(mut field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?
        {
            let name = field.name().unwrap_or_default().to_string();

            if name == "file" {
                let original = field.file_name().unwrap_or_default().to_string();
                if original.is_empty() {
                    continue;
                }

                let uploads = state.config.uploads_dir();
                tokio::fs::create_dir_all(&uploads).await?;
                let path = uploads.join(format!("{}_{}", Uuid::new_v4(), sanitize_filename(&original)));
                // recorded before writing so a failed upload is still cleaned up
                upload = Some((path.clone(), original));

                let mut file = tokio::fs::File::create(&path).await?;
                while let Some(chunk) = field.chunk().await.map_err(|e| upload_error(e.status(), e.body_text()))? {
                    file.write_all(&chunk).await?;
                }
                file.flush().await?;
                tracing::debug!("Stored upload at {}", path.display());
            } else {
                let value = field.text().await.map_err(|e| ApiError::BadRequest(e.body_text()))?;
                if name == "url" {
                    url = Some(value);
                } else {
                    text_fields.push((name, value));
                }
            }
        }
        Ok(())
    }
    .await;

    let submission = result.and_then(|_| {
        let settings = parse_settings_fields(&text_fields)?.into_settings(&state.config.whisper.default_model);
        match &upload {
            Some((path, original)) => Ok(Submission {
                source: JobSource::LocalFile { path: path.clone(), transient: true },
                display_name: Some(original.clone()),
                settings,
            }),
            None => Ok(Submission {
                source: JobSource::from_submission(None, url.clone())?,
                display_name: None,
                settings,
            }),
        }
    });

    if submission.is_err() {
        if let Some((path, _)) = &upload {
            remove_upload(path).await;
        }
    }

    submission
}

fn upload_error(status: axum::http::StatusCode, message: String) -> ApiError {
    if status == axum::http::StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(message)
    } else {
        ApiError::BadRequest(message)
    }
}

async fn remove_upload(path: &FsPath) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!("Failed to remove rejected upload {}: {}", path.display(), e);
    }
}

fn parse_settings_fields(fields: &[(String, String)]) -> Result<SettingsInput, ApiError> {
    let mut input = SettingsInput::default();

    for (name, value) in fields {
        let value = value.trim();
        match name.as_str() {
            "language" => input.language = Some(Language::from(value)),
            "model" => input.model = Some(value.to_string()),
            "output_kind" => input.output_kind = Some(value.parse()?),
            "include_timestamps" => input.include_timestamps = Some(parse_flag(name, value)?),
            "use_text_enhancement" => input.use_text_enhancement = Some(parse_flag(name, value)?),
            other => tracing::debug!("Ignoring unknown form field {}", other),
        }
    }

    Ok(input)
}

fn parse_flag(name: &str, value: &str) -> Result<bool, ApiError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "on" | "yes" => Ok(true),
        "false" | "0" | "off" | "no" | "" => Ok(false),
        _ => Err(ApiError::BadRequest(format!("Invalid boolean for {}: {}", name, value))),
    }
}

pub async fn list(State(state): State<AppState>, Query(params): Query<ListParams>) -> Json<ListResponse> {
    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT);
    Json(ListResponse { items: state.orchestrator.list(limit) })
}

pub async fn get(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Job>, ApiError> {
    let id = JobId::from(id);
    state
        .orchestrator
        .get(&id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Transcription {} not found", id)))
}

pub async fn events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let id = JobId::from(id);
    let subscription = state
        .orchestrator
        .subscribe(&id)
        .ok_or_else(|| ApiError::NotFound(format!("Transcription {} not found", id)))?;

    let stream = subscription
        .into_stream()
        .map(|snapshot| Event::default().event("progress").json_data(&snapshot));

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

pub async fn download(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<DownloadParams>,
) -> Result<Response, ApiError> {
    let kind: ArtifactKind = params.format.as_deref().unwrap_or("md").parse()?;
    let artifact = state.orchestrator.render_artifact(&JobId::from(id), kind)?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static(artifact.content_type),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        header::HeaderValue::from_str(&content_disposition(&artifact.filename))
            .map_err(|e| ApiError::Internal(e.to_string()))?,
    );

    Ok((headers, artifact.body).into_response())
}

/// `attachment` with an ASCII fallback name plus the exact UTF-8 name
fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| if c.is_ascii_graphic() || c == ' ' { c } else { '_' })
        .collect();

    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        urlencoding::encode(filename)
    )
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<String>) -> Json<serde_json::Value> {
    let deleted = state.orchestrator.delete(&JobId::from(id));
    Json(serde_json::json!({ "deleted": deleted }))
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
