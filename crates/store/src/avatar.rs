use std::{io::Cursor, sync::Arc};

use {
    base64::{Engine as _, engine::general_purpose::STANDARD},
    dashmap::DashMap,
    image::{ImageFormat, imageops::FilterType},
};

use crate::{Result, kv::KvStore};

/// Edge length of a stored avatar, in pixels.
pub const AVATAR_SIZE: u32 = 128;

/// Avatar images per user, stored under `avatar:<user>` as base64 PNG.
///
/// Reads are served from an in-process cache after the first hit.
pub struct AvatarStore {
    kv: Arc<dyn KvStore>,
    cache: DashMap<String, String>,
}

/// Decode a base64 image in any supported format and re-encode it as a
/// square [`AVATAR_SIZE`] PNG, returned as base64.
pub fn normalize_avatar(base64_content: &str) -> Result<String> {
    let raw = STANDARD.decode(base64_content.trim())?;
    let resized = image::load_from_memory(&raw)?.resize_exact(
        AVATAR_SIZE,
        AVATAR_SIZE,
        FilterType::Triangle,
    );
    let mut png = Cursor::new(Vec::new());
    resized.write_to(&mut png, ImageFormat::Png)?;
    Ok(STANDARD.encode(png.into_inner()))
}

impl AvatarStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            cache: DashMap::new(),
        }
    }

    fn key(user_id: &str) -> String {
        format!("avatar:{user_id}")
    }

    /// Normalize `base64_content` and store it. Content that does not decode
    /// as an image is rejected and nothing is stored.
    pub async fn save(&self, user_id: &str, base64_content: &str) -> Result<String> {
        let normalized = normalize_avatar(base64_content)?;
        self.kv.set(&Self::key(user_id), &normalized, None).await?;
        self.cache.insert(user_id.to_string(), normalized.clone());
        Ok(normalized)
    }

    pub async fn get(&self, user_id: &str) -> Result<Option<String>> {
        if let Some(hit) = self.cache.get(user_id) {
            return Ok(Some(hit.value().clone()));
        }
        let stored = self.kv.get(&Self::key(user_id)).await?;
        if let Some(content) = &stored {
            self.cache.insert(user_id.to_string(), content.clone());
        }
        Ok(stored)
    }
}
