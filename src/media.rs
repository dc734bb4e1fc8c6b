use std::path::PathBuf;

use base64::{engine::general_purpose::STANDARD, Engine};
use potion::HtmlError;

use crate::{constants::IMAGE_EXTENSIONS, error::ValidationError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub extension: String,
    pub bytes: Vec<u8>,
}

/// Decodes `data:image/<ext>;base64,<payload>`.
pub fn decode_data_uri(data: &str) -> Result<DecodedImage, ValidationError> {
    let (header, payload) = data
        .trim()
        .split_once(";base64,")
        .ok_or(ValidationError::InvalidImage("expected a base64 data URI"))?;

    let extension = header
        .strip_prefix("data:image/")
        .ok_or(ValidationError::InvalidImage("not an image"))?
        .to_lowercase();

    if !IMAGE_EXTENSIONS.contains(&extension.as_str()) {
        return Err(ValidationError::InvalidImage("unsupported image format"));
    }

    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|_| ValidationError::InvalidImage("payload is not valid base64"))?;
    if bytes.is_empty() {
        return Err(ValidationError::InvalidImage("empty image"));
    }

    Ok(DecodedImage { extension, bytes })
}

/// Uploaded files on local disk, served under `url_prefix`.
#[derive(Debug, Clone)]
pub struct MediaStore {
    pub root: PathBuf,
    pub url_prefix: String,
}

impl MediaStore {
    pub fn new(root: impl Into<PathBuf>, url_prefix: &str) -> Self {
        let mut url_prefix = url_prefix.to_string();
        if !url_prefix.ends_with('/') {
            url_prefix.push('/');
        }
        Self {
            root: root.into(),
            url_prefix,
        }
    }

    /// Stores the image under `dir` and returns its public URL.
    ///
    /// `current` is the URL already stored for the owner. Sending it back
    /// keeps the file; any other value must be a data URI.
    pub async fn save_image(
        &self,
        dir: &str,
        data: &str,
        current: Option<&str>,
    ) -> Result<String, potion::Error> {
        if !data.trim_start().starts_with("data:") {
            if current == Some(data) {
                return Ok(data.to_string());
            }
            return Err(ValidationError::InvalidImage("expected a base64 data URI").into());
        }

        let image = decode_data_uri(data).map_err(|e| e.into())?;
        let file_name = format!("{}.{}", uuid::Uuid::new_v4(), image.extension);

        let dir_path = self.root.join(dir);
        tokio::fs::create_dir_all(&dir_path).await.map_err(|e| {
            log::error!("Failed to create media directory {}: {e}", dir_path.display());
            HtmlError::InternalServerError.new("Could not store image")
        })?;
        tokio::fs::write(dir_path.join(&file_name), &image.bytes)
            .await
            .map_err(|e| {
                log::error!("Failed to write {file_name}: {e}");
                HtmlError::InternalServerError.new("Could not store image")
            })?;

        log::debug!("Stored {} bytes as {dir}/{file_name}", image.bytes.len());
        Ok(format!("{}{}/{}", self.url_prefix, dir.trim_matches('/'), file_name))
    }

    /// Removes a file previously returned by [`MediaStore::save_image`].
    pub async fn delete(&self, url: &str) {
        let Some(relative) = url.strip_prefix(&self.url_prefix) else {
            return;
        };
        if relative.split('/').any(|part| part == "..") {
            return;
        }
        if let Err(e) = tokio::fs::remove_file(self.root.join(relative)).await {
            log::warn!("Failed to delete {url}: {e}");
        }
    }
}
