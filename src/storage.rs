use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::info;

/// Lowercase ASCII slug; anything else collapses to single dashes.
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut pending_dash = false;
    for ch in value.trim().chars() {
        if ch.is_ascii_alphanumeric() || ch == '.' {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    let slug = slug.trim_matches(|c: char| c == '.' || c == '-').to_string();
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug
    }
}

/// `posts/<category>/<admin>/<millis>_<file>`
pub fn upload_path(category: &str, admin_name: &str, unix_millis: i128, filename: &str) -> String {
    format!(
        "posts/{}/{}/{}_{}",
        slugify(category),
        slugify(admin_name),
        unix_millis,
        slugify(filename)
    )
}

/// Media files on local disk, served under a public base URL.
#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
    public_base_url: String,
}

impl MediaStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: &str) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn url_for(&self, relative_path: &str) -> String {
        format!("{}/{}", self.public_base_url, relative_path)
    }

    pub async fn save(&self, relative_path: &str, bytes: &[u8]) -> Result<String> {
        let path = self.root.join(relative_path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create media directory {}", parent.display()))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write media file {}", path.display()))?;

        info!(path = %relative_path, size = bytes.len(), "Stored media upload");
        Ok(self.url_for(relative_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Good Morning"), "good-morning");
        assert_eq!(slugify("  Health & Clinic "), "health-clinic");
        assert_eq!(slugify("../../etc/passwd"), "etc-passwd");
        assert_eq!(slugify("ಶುಭೋದಯ"), "untitled");
        assert_eq!(slugify("Diwali Poster.JPG"), "diwali-poster.jpg");
    }

    #[test]
    fn test_upload_path_is_namespaced() {
        assert_eq!(
            upload_path("Festivals", "Asha K", 1718000000000, "poster.png"),
            "posts/festivals/asha-k/1718000000000_poster.png"
        );
    }

    #[tokio::test]
    async fn test_save_writes_under_root() {
        let root = std::env::temp_dir().join(format!("prime-status-media-{}", uuid::Uuid::new_v4()));
        let store = MediaStore::new(&root, "https://cdn.example/media/");
        let relative = upload_path("Quotes", "Asha", 1, "a.jpg");

        let url = store.save(&relative, b"jpeg-bytes").await.unwrap();

        assert_eq!(url, "https://cdn.example/media/posts/quotes/asha/1_a.jpg");
        let stored = tokio::fs::read(root.join(&relative)).await.unwrap();
        assert_eq!(stored, b"jpeg-bytes");
        tokio::fs::remove_dir_all(&root).await.unwrap();
    }
}
