use crate::types::{Embed, EmbedFooter, EmbedImage, Result, WebhookMessage};
use crate::utils::check_fields_defined;
use crate::utils::text::{clean_up_tags, format_bytes, readable_list, truncate};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Fields every post returned by the source must carry
pub const REQUIRED_FIELDS: [&str; 8] = [
    "id",
    "rating",
    "tag_string_artist",
    "tag_string_character",
    "tag_string_general",
    "tag_string_copyright",
    "file_ext",
    "file_size",
];

const TITLE_LIMIT: usize = 96;

#[derive(Debug, Deserialize)]
struct RawPost {
    id: u64,
    rating: String,
    source: Option<String>,
    tag_string_artist: String,
    tag_string_character: String,
    tag_string_general: String,
    tag_string_copyright: String,
    created_at: Option<String>,
    image_height: Option<u64>,
    image_width: Option<u64>,
    file_url: Option<String>,
    preview_file_url: Option<String>,
    file_ext: String,
    file_size: u64,
    is_banned: Option<bool>,
    is_deleted: Option<bool>,
    is_pending: Option<bool>,
    is_flagged: Option<bool>,
}

/// Normalized view of one post
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostInfo {
    pub id: u64,
    pub rating: String,
    pub source: Option<String>,
    pub artists: Vec<String>,
    pub characters: Vec<String>,
    pub tags: Vec<String>,
    pub origin: Vec<String>,
    pub created_at: String,
    pub width: Option<u64>,
    pub height: Option<u64>,
    pub file_url: Option<String>,
    pub preview_url: Option<String>,
    pub file_ext: String,
    pub file_size: u64,
    pub is_banned: bool,
    pub is_deleted: bool,
    pub is_pending: bool,
    pub is_flagged: bool,
    pub post_url: String,
    pub artist_url: String,
}

fn split_tags(tag_string: &str) -> Vec<String> {
    tag_string.split_whitespace().map(str::to_string).collect()
}

impl PostInfo {
    /// Validate and normalize a raw post record; `base_url` is used for the derived links
    pub fn from_raw(raw: &serde_json::Value, base_url: &str) -> Result<Self> {
        check_fields_defined(raw, &REQUIRED_FIELDS)?;
        let post: RawPost = serde_json::from_value(raw.clone())?;

        let artists = split_tags(&post.tag_string_artist);
        let artist_url = format!("{}/posts?tags={}", base_url, artists.join("+"));

        Ok(Self {
            id: post.id,
            rating: post.rating,
            source: post.source,
            characters: split_tags(&post.tag_string_character),
            tags: split_tags(&post.tag_string_general),
            origin: split_tags(&post.tag_string_copyright),
            created_at: post.created_at.unwrap_or_else(|| Utc::now().to_rfc3339()),
            width: post.image_width,
            height: post.image_height,
            file_url: post.file_url,
            preview_url: post.preview_file_url,
            file_ext: post.file_ext,
            file_size: post.file_size,
            is_banned: post.is_banned.unwrap_or(false),
            is_deleted: post.is_deleted.unwrap_or(false),
            is_pending: post.is_pending.unwrap_or(false),
            is_flagged: post.is_flagged.unwrap_or(false),
            post_url: format!("{}/posts/{}", base_url, post.id),
            artist_url,
            artists,
        })
    }

    pub fn readable_artists(&self) -> String {
        readable_list(&clean_up_tags(&self.artists))
    }

    pub fn readable_characters(&self) -> String {
        readable_list(&clean_up_tags(&self.characters))
    }

    pub fn readable_origin(&self) -> String {
        readable_list(&clean_up_tags(&self.origin))
    }

    pub fn readable_file_size(&self) -> String {
        format_bytes(self.file_size)
    }

    pub fn dimensions(&self) -> String {
        let show = |v: Option<u64>| v.map(|n| n.to_string()).unwrap_or_else(|| "Unknown".to_string());
        format!("{} × {}", show(self.width), show(self.height))
    }

    /// Posts without media links are treated as having a banned artist
    pub fn has_media(&self) -> bool {
        self.file_url.is_some() && self.preview_url.is_some()
    }

    fn embed_image(&self) -> Option<EmbedImage> {
        match self.file_ext.as_str() {
            "jpg" | "png" | "webp" | "gif" => self.file_url.clone().map(|url| EmbedImage { url }),
            "mp4" | "webm" => self.preview_url.clone().map(|url| EmbedImage { url }),
            "zip" => {
                warn!("Ugoira file type not supported (post {})", self.id);
                None
            }
            other => {
                warn!("Unknown file type {} (post {})", other, self.id);
                None
            }
        }
    }

    /// Build the delivery document for this post
    pub fn to_webhook(&self) -> WebhookMessage {
        let title = format!(
            "{} from {}",
            truncate(&self.readable_characters(), TITLE_LIMIT),
            truncate(&self.readable_origin(), TITLE_LIMIT)
        );
        let description = if self.artists.is_empty() {
            None
        } else {
            Some(format!("By **[{}]({})**", self.readable_artists(), self.artist_url))
        };

        WebhookMessage {
            username: None,
            avatar_url: None,
            embeds: vec![Embed {
                title,
                url: self.post_url.clone(),
                description,
                image: self.embed_image(),
                footer: EmbedFooter {
                    text: format!("{} • {}", self.dimensions(), self.readable_file_size()),
                },
                timestamp: self.created_at.clone(),
            }],
        }
    }
}
