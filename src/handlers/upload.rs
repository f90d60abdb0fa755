//! Multipart decoding for listing requests.
//!
//! The `image` part is streamed to a temporary file under the configured
//! upload directory; text parts become [`ListingFields`]. Only `jpg`, `jpeg`
//! and `png` images are accepted.

use crate::{
    errors::AppError,
    models::{
        listing::{ListingFields, ListingForm},
        media::{ImageFormat, StagedFile},
    },
    state::{AppState, UploadSettings},
};
use axum::extract::{
    FromRequest, Multipart, Request,
    multipart::Field,
};
use tempfile::NamedTempFile;
use tokio::{fs, io::AsyncWriteExt};
use uuid::Uuid;

pub const IMAGE_FIELD: &str = "image";

impl FromRequest<AppState> for ListingForm {
    type Rejection = AppError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let mut multipart = Multipart::from_request(req, state)
            .await
            .map_err(|rejection| AppError::new(rejection.status(), rejection.body_text()))?;
        read_listing_form(&mut multipart, &state.uploads).await
    }
}

/// Drain a multipart body into a [`ListingForm`].
pub async fn read_listing_form(
    multipart: &mut Multipart,
    settings: &UploadSettings,
) -> Result<ListingForm, AppError> {
    let mut form = ListingForm::default();
    let fields: &mut ListingFields = &mut form.fields;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            IMAGE_FIELD => {
                if form.image.is_some() {
                    return Err(AppError::bad_request("only one image may be uploaded"));
                }
                form.image = stage_file(field, settings).await?;
            }
            "streetAddress" => fields.street_address = text_value(field).await?,
            "city" => fields.city = text_value(field).await?,
            "price" => fields.price = number_value("price", field).await?,
            "size" => fields.size = number_value("size", field).await?,
            "owner" => {
                fields.owner = match text_value(field).await? {
                    Some(raw) => Some(
                        Uuid::parse_str(&raw)
                            .map_err(|_| AppError::bad_request("owner must be a UUID"))?,
                    ),
                    None => None,
                }
            }
            _ => tracing::debug!(field = %name, "ignoring unknown form field"),
        }
    }

    Ok(form)
}

/// Text value of a part; blank values count as not supplied.
async fn text_value(field: Field<'_>) -> Result<Option<String>, AppError> {
    let text = field.text().await?;
    let trimmed = text.trim();
    Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
}

async fn number_value(name: &str, field: Field<'_>) -> Result<Option<f64>, AppError> {
    match text_value(field).await? {
        Some(raw) => raw
            .parse::<f64>()
            .map(Some)
            .map_err(|_| AppError::bad_request(format!("{} must be a number", name))),
        None => Ok(None),
    }
}

/// Stream the file part to disk. A part without a filename means no file was
/// chosen and yields `None`.
async fn stage_file(
    mut field: Field<'_>,
    settings: &UploadSettings,
) -> Result<Option<StagedFile>, AppError> {
    let filename = match field.file_name() {
        Some(name) if !name.trim().is_empty() => name.trim().to_string(),
        _ => return Ok(None),
    };
    let content_type = field.content_type().map(str::to_string);
    let format = ImageFormat::detect(&filename, content_type.as_deref()).ok_or_else(|| {
        AppError::bad_request(format!(
            "`{}` is not an allowed image type (jpg, jpeg, png)",
            filename
        ))
    })?;

    fs::create_dir_all(&settings.dir).await?;
    let (std_file, temp_path) = NamedTempFile::new_in(&settings.dir)?.into_parts();
    let mut file = fs::File::from_std(std_file);

    let mut size_bytes: u64 = 0;
    while let Some(chunk) = field.chunk().await? {
        size_bytes += chunk.len() as u64;
        if size_bytes > settings.max_bytes {
            return Err(AppError::bad_request(format!(
                "image exceeds the {} byte upload limit",
                settings.max_bytes
            )));
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    if size_bytes == 0 {
        return Err(AppError::bad_request("uploaded image is empty"));
    }

    tracing::debug!(
        filename = %filename,
        size_bytes,
        path = %temp_path.display(),
        "staged uploaded image"
    );
    Ok(Some(StagedFile::new(temp_path, filename, format, size_bytes)))
}
