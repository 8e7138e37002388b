//! Management of categories and participants.
//!
//! The admin password is a plain string compared on the client. It keeps
//! casual visitors out of the management operations and nothing more; the
//! backend's access policies are what actually decide who may write.

use chrono::Utc;
use tracing::{info, warn};

use crate::{
    data::{Category, CategoryId, NewCategory, NewParticipant, Participant, ParticipantId, Table},
    error::{Error, ValidationError},
    gateway::{Gateway, ImageUpload},
    voter::random_base36,
};

/// Object storage bucket holding participant images.
pub const IMAGE_BUCKET: &str = "participant-images";
/// Largest accepted image upload, in bytes.
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

const IMAGE_FOLDER: &str = "participants";
const OBJECT_SUFFIX_LEN: usize = 7;

/// Guards the admin operations with the configured password.
#[derive(Debug, Clone)]
pub struct AdminGate {
    password: Option<String>,
}

impl AdminGate {
    /// A gate with no password never opens.
    pub fn new(password: Option<String>) -> Self {
        Self { password }
    }

    pub fn unlock<'g, G: Gateway>(
        &self,
        gateway: &'g G,
        attempt: &str,
    ) -> Result<AdminConsole<'g, G>, Error> {
        match &self.password {
            Some(password) if password == attempt => {
                info!("admin console unlocked");
                Ok(AdminConsole { gateway })
            }
            _ => {
                warn!("rejected admin password");
                Err(Error::AccessDenied)
            }
        }
    }
}

/// Where the image of a new participant comes from.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ImageSource {
    /// An image hosted elsewhere.
    Url(String),
    /// A file to store in [`IMAGE_BUCKET`].
    Upload(ImageUpload),
}

/// The fields of a participant to be added.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ParticipantDraft {
    pub category_id: CategoryId,
    pub name: String,
    pub description: Option<String>,
    pub image: Option<ImageSource>,
}

/// Row counts shown on the admin dashboard.
#[derive(Debug, Default, PartialEq, Eq, Copy, Clone)]
pub struct DashboardStats {
    pub categories: u64,
    pub participants: u64,
    pub votes: u64,
}

/// The admin operations, available once the gate is unlocked.
pub struct AdminConsole<'g, G: Gateway> {
    gateway: &'g G,
}

impl<'g, G: Gateway> AdminConsole<'g, G> {
    /// Appends a category after the existing ones.
    pub async fn add_category(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<Category, Error> {
        let name = required(name, "name")?;
        let display_order = self.gateway.count_rows(Table::Categories).await? as i64;
        let category = self
            .gateway
            .insert_category(&NewCategory {
                name,
                description: optional(description),
                display_order,
            })
            .await?;
        info!(id = %category.id, name = %category.name, display_order, "added category");
        Ok(category)
    }

    /// Deletes a category. What happens to its participants and votes is up
    /// to the backend schema.
    pub async fn delete_category(&self, id: &CategoryId) -> Result<(), Error> {
        self.gateway.delete_category(id).await?;
        info!(%id, "deleted category");
        Ok(())
    }

    /// Adds a participant to a category. A failed image upload does not stop
    /// the participant from being added; it is added without an image.
    pub async fn add_participant(&self, draft: ParticipantDraft) -> Result<Participant, Error> {
        let name = required(&draft.name, "name")?;
        if let Some(ImageSource::Upload(upload)) = &draft.image {
            validate_image(upload)?;
        }

        let image_url = match draft.image {
            None => None,
            Some(ImageSource::Url(url)) => optional(Some(&url)),
            Some(ImageSource::Upload(upload)) => self.store_image(&upload).await,
        };

        let participant = self
            .gateway
            .insert_participant(&NewParticipant {
                category_id: draft.category_id,
                name,
                description: optional(draft.description.as_deref()),
                image_url,
            })
            .await?;
        info!(id = %participant.id, category = %participant.category_id, "added participant");
        Ok(participant)
    }

    pub async fn delete_participant(&self, id: &ParticipantId) -> Result<(), Error> {
        self.gateway.delete_participant(id).await?;
        info!(%id, "deleted participant");
        Ok(())
    }

    /// Counts the rows of each table. A count that cannot be read is shown
    /// as zero.
    pub async fn stats(&self) -> DashboardStats {
        DashboardStats {
            categories: self.count_or_zero(Table::Categories).await,
            participants: self.count_or_zero(Table::Participants).await,
            votes: self.count_or_zero(Table::Votes).await,
        }
    }

    async fn count_or_zero(&self, table: Table) -> u64 {
        self.gateway.count_rows(table).await.unwrap_or_else(|e| {
            warn!(%table, error = %e, "could not count rows");
            0
        })
    }

    /// Uploads the image and returns its public URL, or `None` if the upload
    /// failed.
    async fn store_image(&self, upload: &ImageUpload) -> Option<String> {
        let path = object_path(upload);
        let uploaded = self.gateway.upload_object(IMAGE_BUCKET, &path, upload);
        match uploaded.await {
            Ok(()) => {
                info!(%path, size = upload.bytes.len(), "uploaded participant image");
                Some(self.gateway.public_url(IMAGE_BUCKET, &path))
            }
            Err(e) => {
                warn!(%path, error = %e, "image upload failed, adding without an image");
                None
            }
        }
    }
}

fn required(value: &str, field: &'static str) -> Result<String, ValidationError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ValidationError::MissingField { field });
    }
    Ok(value.to_owned())
}

/// Blank values are stored as absent.
fn optional(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}

fn validate_image(upload: &ImageUpload) -> Result<(), ValidationError> {
    if !upload.content_type.starts_with("image/") {
        return Err(ValidationError::NotAnImage {
            content_type: upload.content_type.clone(),
        });
    }
    if upload.bytes.len() > MAX_IMAGE_BYTES {
        return Err(ValidationError::ImageTooLarge {
            size: upload.bytes.len(),
            limit: MAX_IMAGE_BYTES,
        });
    }
    Ok(())
}

/// `participants/<unix millis>-<random>.<extension>`, unique enough that an
/// existing object is never hit in practice.
fn object_path(upload: &ImageUpload) -> String {
    format!(
        "{IMAGE_FOLDER}/{}-{}.{}",
        Utc::now().timestamp_millis(),
        random_base36(OBJECT_SUFFIX_LEN),
        extension(upload)
    )
}

/// The extension of the file name, or else the subtype of the content type.
fn extension(upload: &ImageUpload) -> String {
    let subtype = || {
        let (_, subtype) = upload.content_type.split_once('/')?;
        Some(subtype)
    };
    upload
        .file_name
        .rsplit_once('.')
        .map(|(_, extension)| extension)
        .filter(|extension| !extension.is_empty())
        .or_else(subtype)
        .unwrap_or("img")
        .to_ascii_lowercase()
}
