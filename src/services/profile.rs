use crate::models::{ProfileChanges, User, UserInfo};
use crate::schema::users;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use uuid::Uuid;
use super::error::ServiceError;

pub const ALLOWED_PHOTO_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "gif"];
pub const MAX_NAME_CHARS: usize = 100;

/// Returns the lower-cased extension of an uploaded file name if it is one
/// of the accepted image types.
pub fn photo_extension(file_name: &str) -> Result<String, ServiceError> {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    if ALLOWED_PHOTO_EXTENSIONS.contains(&extension.as_str()) {
        Ok(extension)
    } else {
        Err(ServiceError::InvalidInput(
            "Profile photo must be a png, jpg, jpeg or gif file.".to_string(),
        ))
    }
}

pub fn check_photo_size(len: u64, max_bytes: u64) -> Result<(), ServiceError> {
    if len > max_bytes {
        return Err(ServiceError::InvalidInput(format!(
            "Profile photo must not exceed {} KiB.",
            max_bytes / 1024
        )));
    }
    Ok(())
}

/// Storage name for a freshly uploaded photo. Never derived from the
/// client-supplied file name.
pub fn photo_file_name(owner: i32, extension: &str) -> String {
    format!("{}_{}.{}", owner, Uuid::new_v4().simple(), extension)
}

pub fn get_profile(conn: &mut SqliteConnection, owner: i32) -> Result<UserInfo, ServiceError> {
    users::table
        .find(owner)
        .select(User::as_select())
        .first::<User>(conn)
        .optional()?
        .map(UserInfo::from)
        .ok_or_else(|| ServiceError::NotFound("User not found.".to_string()))
}

fn blank_to_none(raw: &str) -> Option<&str> {
    Some(raw.trim()).filter(|s| !s.is_empty())
}

/// Applies a profile edit. For `name` and `bio`, `None` means the field was
/// not submitted and stays as it is, while a blank value clears it. The
/// photo reference is only replaced when `photo` is given.
pub fn update_profile(
    conn: &mut SqliteConnection,
    owner: i32,
    name: Option<&str>,
    bio: Option<&str>,
    photo: Option<&str>,
) -> Result<UserInfo, ServiceError> {
    let changes = ProfileChanges {
        name: name.map(blank_to_none),
        bio: bio.map(blank_to_none),
        profile_photo: photo,
    };

    if let Some(Some(n)) = changes.name {
        if n.chars().count() > MAX_NAME_CHARS {
            return Err(ServiceError::InvalidInput(format!(
                "Name is limited to {} characters.",
                MAX_NAME_CHARS
            )));
        }
    }

    if !changes.is_empty() {
        let updated = diesel::update(users::table.find(owner))
            .set(&changes)
            .execute(conn)?;
        if updated == 0 {
            return Err(ServiceError::NotFound("User not found.".to_string()));
        }
    }

    get_profile(conn, owner)
}
