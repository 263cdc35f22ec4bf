use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{config::Config, error::Error};

pub const ALLOWED_AVATAR_FORMATS: &[&str] = &["image/png", "image/jpeg", "image/webp"];

/// Reference to an avatar kept on the external asset host.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AvatarModel {
    pub public_id: String,
    pub url: String,
}

/// An uploaded file as it arrived in the request, before any store access.
#[derive(Debug, Clone)]
pub struct AvatarFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

pub fn ensure_supported_format(content_type: &str) -> Result<(), Error> {
    if ALLOWED_AVATAR_FORMATS.contains(&content_type) {
        Ok(())
    } else {
        Err(Error::UnsupportedFormat)
    }
}

#[async_trait]
pub trait AvatarStore: Send + Sync {
    async fn upload(&self, file: AvatarFile) -> Result<AvatarModel, Error>;
}

#[derive(Clone)]
pub struct AvatarStoreHandle(pub Arc<dyn AvatarStore>);

impl std::ops::Deref for AvatarStoreHandle {
    type Target = dyn AvatarStore;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

/// Unsigned upload to the Cloudinary image endpoint. Failures are fatal for
/// the request; nothing is retried.
pub struct CloudinaryStore {
    client: reqwest::Client,
    upload_url: String,
    upload_preset: String,
}

impl CloudinaryStore {
    pub fn new(config: &Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            upload_url: format!(
                "https://api.cloudinary.com/v1_1/{}/image/upload",
                config.cloudinary_cloud_name
            ),
            upload_preset: config.cloudinary_upload_preset.clone(),
        }
    }
}

#[derive(Deserialize)]
struct CloudinaryUploadResponse {
    public_id: String,
    secure_url: String,
}

#[async_trait]
impl AvatarStore for CloudinaryStore {
    async fn upload(&self, file: AvatarFile) -> Result<AvatarModel, Error> {
        let part = reqwest::multipart::Part::bytes(file.bytes)
            .file_name(file.file_name)
            .mime_str(&file.content_type)
            .map_err(|err| Error::UploadFailed(err.into()))?;

        let form = reqwest::multipart::Form::new()
            .text("upload_preset", self.upload_preset.clone())
            .part("file", part);

        let response = self
            .client
            .post(&self.upload_url)
            .multipart(form)
            .send()
            .await
            .map_err(|err| Error::UploadFailed(err.into()))?;

        if !response.status().is_success() {
            return Err(Error::UploadFailed(anyhow::anyhow!(
                "asset host returned {}",
                response.status()
            )));
        }

        let body: CloudinaryUploadResponse = response
            .json()
            .await
            .map_err(|err| Error::UploadFailed(err.into()))?;

        Ok(AvatarModel {
            public_id: body.public_id,
            url: body.secure_url,
        })
    }
}
