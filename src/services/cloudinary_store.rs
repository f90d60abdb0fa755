//! Cloudinary-compatible [`MediaStore`] speaking the signed upload API.
//!
//! - upload:  `POST {api_base}/v1_1/{cloud}/image/upload` (multipart)
//! - destroy: `POST {api_base}/v1_1/{cloud}/image/destroy`
//! - list:    `GET  {api_base}/v1_1/{cloud}/resources/image/upload` (basic auth)

use crate::{
    models::{
        listing::MediaReference,
        media::{DeleteOutcome, RemoteObject, StagedFile, UploadOptions},
    },
    services::media_store::{MediaResult, MediaStore, MediaStoreError},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::debug;

const PAGE_SIZE: u32 = 500;

/// Account credentials, injected once at construction.
#[derive(Clone)]
pub struct CloudinaryCredentials {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
}

impl fmt::Debug for CloudinaryCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudinaryCredentials")
            .field("cloud_name", &self.cloud_name)
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct CloudinaryStore {
    client: reqwest::Client,
    api_base: String,
    credentials: CloudinaryCredentials,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    secure_url: String,
    public_id: String,
}

#[derive(Debug, Deserialize)]
struct DestroyResponse {
    result: String,
}

#[derive(Debug, Deserialize)]
struct ResourcesResponse {
    #[serde(default)]
    resources: Vec<Resource>,
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Resource {
    public_id: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl CloudinaryStore {
    pub fn new(client: reqwest::Client, api_base: impl Into<String>, credentials: CloudinaryCredentials) -> Self {
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            credentials,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/v1_1/{}/{}",
            self.api_base, self.credentials.cloud_name, path
        )
    }

    /// Signed request parameters: the given params plus `timestamp`,
    /// `api_key`, `signature_algorithm` and `signature`.
    fn signed_params(&self, mut params: Vec<(&'static str, String)>) -> Vec<(&'static str, String)> {
        params.push(("timestamp", Utc::now().timestamp().to_string()));
        let signature = sign_params(&params, &self.credentials.api_secret);
        params.push(("api_key", self.credentials.api_key.clone()));
        params.push(("signature_algorithm", "sha256".to_string()));
        params.push(("signature", signature));
        params
    }
}

/// Hex SHA-256 over `k=v` pairs sorted by key and joined with `&`, followed
/// by the API secret.
pub fn sign_params(params: &[(&str, String)], api_secret: &str) -> String {
    let mut sorted: Vec<&(&str, String)> = params.iter().filter(|(_, v)| !v.is_empty()).collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    let joined = sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Turn a non-success response into a readable message.
async fn error_message(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(parsed) => format!("{}: {}", status, parsed.error.message),
        Err(_) => format!("{}: {}", status, body),
    }
}

/// Interpret the `result` field of a destroy call.
fn destroy_outcome(remote_id: &str, result: &str) -> MediaResult<DeleteOutcome> {
    match result {
        "ok" => Ok(DeleteOutcome::Deleted),
        "not found" => Ok(DeleteOutcome::NotFound),
        other => Err(MediaStoreError::DeleteFailed {
            remote_id: remote_id.to_string(),
            reason: format!("unexpected result `{}`", other),
        }),
    }
}

#[async_trait]
impl MediaStore for CloudinaryStore {
    async fn upload(&self, file: &StagedFile, options: &UploadOptions) -> MediaResult<MediaReference> {
        let bytes = tokio::fs::read(file.path()).await?;
        let part = Part::bytes(bytes)
            .file_name(file.original_filename.clone())
            .mime_str(file.mime_type())?;

        let mut params = Vec::new();
        let folder = options.folder.trim_matches('/');
        if !folder.is_empty() {
            params.push(("folder", folder.to_string()));
        }

        let form = self
            .signed_params(params)
            .into_iter()
            .fold(Form::new(), |form, (k, v)| form.text(k, v))
            .part("file", part);

        let response = self
            .client
            .post(self.endpoint("image/upload"))
            .multipart(form)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(MediaStoreError::UploadFailed(error_message(response).await));
        }

        let body: UploadResponse = response.json().await?;
        debug!(remote_id = %body.public_id, "uploaded media to cloudinary");
        Ok(MediaReference {
            url: body.secure_url,
            remote_id: body.public_id,
        })
    }

    async fn delete(&self, remote_id: &str) -> MediaResult<DeleteOutcome> {
        let params = self.signed_params(vec![("public_id", remote_id.to_string())]);
        let response = self
            .client
            .post(self.endpoint("image/destroy"))
            .form(&params)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(DeleteOutcome::NotFound);
        }
        if !response.status().is_success() {
            return Err(MediaStoreError::DeleteFailed {
                remote_id: remote_id.to_string(),
                reason: error_message(response).await,
            });
        }

        let body: DestroyResponse = response.json().await?;
        destroy_outcome(remote_id, &body.result)
    }

    async fn list(&self, folder: &str) -> MediaResult<Vec<RemoteObject>> {
        let folder = folder.trim_matches('/');
        let prefix = if folder.is_empty() {
            String::new()
        } else {
            format!("{}/", folder)
        };
        let mut objects = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut query = vec![
                ("type", "upload".to_string()),
                ("prefix", prefix.clone()),
                ("max_results", PAGE_SIZE.to_string()),
            ];
            if let Some(next) = cursor.take() {
                query.push(("next_cursor", next));
            }

            let response = self
                .client
                .get(self.endpoint("resources/image/upload"))
                .basic_auth(&self.credentials.api_key, Some(&self.credentials.api_secret))
                .query(&query)
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(MediaStoreError::ListFailed {
                    folder: folder.to_string(),
                    reason: error_message(response).await,
                });
            }

            let page: ResourcesResponse = response.json().await?;
            objects.extend(page.resources.into_iter().map(|r| RemoteObject {
                remote_id: r.public_id,
                created_at: r.created_at,
            }));
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        Ok(objects)
    }

    fn backend_name(&self) -> &'static str {
        "cloudinary"
    }
}
