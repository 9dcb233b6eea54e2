//! crates/questiongen_core/src/extractor.rs
//!
//! Turns selected course materials into plain text. Images and PDFs go through
//! an image-to-text call, cached by the SHA-256 of the file bytes.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::domain::{ContentItem, ContextId, StoredFile};
use crate::ports::{CaptioningService, ExtractionCache, PdfRasterizer, PortError};
use crate::prompt::strip_html;

pub const SUPPORTED_MIME_TYPES: [&str; 7] = [
    "text/plain",
    "text/html",
    "text/csv",
    "application/pdf",
    "image/png",
    "image/jpeg",
    "image/jpg",
];

/// MIME types that need an image-to-text call.
pub const CAPTIONED_MIME_TYPES: [&str; 4] =
    ["application/pdf", "image/png", "image/jpeg", "image/jpg"];

pub const EXTRACTION_INSTRUCTION: &str = "Return the text that is written on the image/document. Do not wrap any explanatory text around. Return only the bare content.";

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("Could not extract the text of {file_name}: {reason}")]
    Captioning { file_name: String, reason: String },
    #[error(transparent)]
    Port(#[from] PortError),
}

pub struct ContentExtractor {
    cache: Arc<dyn ExtractionCache>,
    captioner: Arc<dyn CaptioningService>,
    rasterizer: Arc<dyn PdfRasterizer>,
}

impl ContentExtractor {
    pub fn new(
        cache: Arc<dyn ExtractionCache>,
        captioner: Arc<dyn CaptioningService>,
        rasterizer: Arc<dyn PdfRasterizer>,
    ) -> Self {
        Self {
            cache,
            captioner,
            rasterizer,
        }
    }

    /// Extracts the text of every item in order and concatenates it without
    /// separators. Unsupported items contribute nothing.
    pub async fn extract_all(
        &self,
        context_id: ContextId,
        items: &[ContentItem],
    ) -> Result<String, ExtractionError> {
        let mut story = String::new();
        for item in items {
            if let Some(text) = self.extract(context_id, item).await? {
                story.push_str(&text);
            }
        }
        Ok(story)
    }

    /// Returns `None` for items that are skipped.
    pub async fn extract(
        &self,
        context_id: ContextId,
        item: &ContentItem,
    ) -> Result<Option<String>, ExtractionError> {
        let raw = match item {
            ContentItem::Page { html, .. } | ContentItem::Label { html, .. } => html.clone(),
            ContentItem::Resource { id, file } => {
                let mime_type = file.mime_type.to_ascii_lowercase();
                if !SUPPORTED_MIME_TYPES.contains(&mime_type.as_str()) {
                    warn!(
                        "Skipping resource {} ({}): unsupported MIME type {}.",
                        id, file.file_name, file.mime_type
                    );
                    return Ok(None);
                }
                if CAPTIONED_MIME_TYPES.contains(&mime_type.as_str()) {
                    match self.caption_file(context_id, file, &mime_type).await? {
                        Some(text) => text,
                        None => return Ok(None),
                    }
                } else {
                    String::from_utf8_lossy(&file.content).into_owned()
                }
            }
            ContentItem::Unsupported { id, kind } => {
                warn!("Skipping course module {}: {} is not supported.", id, kind);
                return Ok(None);
            }
        };
        Ok(Some(strip_html(&raw)))
    }

    async fn caption_file(
        &self,
        context_id: ContextId,
        file: &StoredFile,
        mime_type: &str,
    ) -> Result<Option<String>, ExtractionError> {
        let hash = file.content_hash();
        if let Some(entry) = self.cache.get_entry(&hash).await? {
            debug!("Extraction cache hit for {} ({}).", file.file_name, hash);
            self.cache.touch_entry(&hash, Utc::now()).await?;
            return Ok(Some(entry.extracted_content));
        }

        let text = if self.captioner.accepts_mime_type(mime_type) {
            self.caption(context_id, file, mime_type, &file.content).await?
        } else if mime_type == "application/pdf" {
            let pages = self.rasterizer.rasterize(&file.content).await.map_err(|e| {
                ExtractionError::Captioning {
                    file_name: file.file_name.clone(),
                    reason: e.to_string(),
                }
            })?;
            info!(
                "Extracting {} page(s) of {} one by one.",
                pages.len(),
                file.file_name
            );
            let mut text = String::new();
            for page in &pages {
                text.push_str(
                    &self
                        .caption(context_id, file, &page.mime_type, &page.content)
                        .await?,
                );
            }
            text
        } else {
            warn!(
                "Skipping {}: the captioning provider does not accept {}.",
                file.file_name, mime_type
            );
            return Ok(None);
        };

        self.cache.upsert_entry(&hash, &text, Utc::now()).await?;
        Ok(Some(text))
    }

    async fn caption(
        &self,
        context_id: ContextId,
        file: &StoredFile,
        mime_type: &str,
        bytes: &[u8],
    ) -> Result<String, ExtractionError> {
        let data_url = format!("data:{};base64,{}", mime_type, BASE64.encode(bytes));
        self.captioner
            .caption(context_id, EXTRACTION_INSTRUCTION, &data_url)
            .await
            .map_err(|e| ExtractionError::Captioning {
                file_name: file.file_name.clone(),
                reason: e.to_string(),
            })
    }
}
