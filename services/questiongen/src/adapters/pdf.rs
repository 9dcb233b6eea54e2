//! services/questiongen/src/adapters/pdf.rs
//!
//! Renders PDFs to PNG pages with poppler's `pdftoppm`, for captioning services
//! that only take images.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use questiongen_core::{
    domain::PageImage,
    ports::{PdfRasterizer, PortError, PortResult},
};
use tokio::process::Command;
use tracing::debug;

const PAGE_PREFIX: &str = "page";

pub struct PdftoppmRasterizer {
    binary: PathBuf,
}

impl PdftoppmRasterizer {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

/// Page files written by `pdftoppm`, in page order.
///
/// Page numbers are zero-padded to the width of the page count, so a plain
/// name sort is not enough once a document crosses a power of ten.
async fn rendered_pages(dir: &Path) -> PortResult<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;
    let mut pages = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?
    {
        let path = entry.path();
        if let Some(number) = page_number(&path) {
            pages.push((number, path));
        }
    }
    pages.sort_by_key(|(number, _)| *number);
    Ok(pages.into_iter().map(|(_, path)| path).collect())
}

fn page_number(path: &Path) -> Option<u32> {
    if path.extension()?.to_str()? != "png" {
        return None;
    }
    path.file_stem()?
        .to_str()?
        .strip_prefix(PAGE_PREFIX)?
        .trim_start_matches('-')
        .parse()
        .ok()
}

#[async_trait]
impl PdfRasterizer for PdftoppmRasterizer {
    async fn rasterize(&self, pdf: &[u8]) -> PortResult<Vec<PageImage>> {
        let workdir = tempfile::tempdir().map_err(|e| PortError::Unexpected(e.to_string()))?;
        let input = workdir.path().join("input.pdf");
        tokio::fs::write(&input, pdf)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let output = Command::new(&self.binary)
            .arg("-png")
            .arg(&input)
            .arg(workdir.path().join(PAGE_PREFIX))
            .output()
            .await
            .map_err(|e| {
                PortError::Unexpected(format!("Could not run {}: {}", self.binary.display(), e))
            })?;
        if !output.status.success() {
            return Err(PortError::Unexpected(format!(
                "pdftoppm failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let mut images = Vec::new();
        for path in rendered_pages(workdir.path()).await? {
            let content = tokio::fs::read(&path)
                .await
                .map_err(|e| PortError::Unexpected(e.to_string()))?;
            images.push(PageImage {
                mime_type: "image/png".to_string(),
                content,
            });
        }
        debug!("Rasterized PDF into {} page(s).", images.len());
        Ok(images)
    }
}
