use anyhow::{Context, Result};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use url::Url;

use crate::dom;
use crate::fetcher::Fetcher;
use crate::resource_localizer::ResourceLocalizer;
use crate::sanitizer::sanitize;
use crate::style_extractor::StyleExtractor;
use crate::writer::write_output;

/// One clone run: owns the HTTP client, the counters and the output
/// layout. Stages execute in a fixed order over a single mutable tree:
/// fetch, parse, localize images, extract CSS, sanitize, write.
///
/// Image localization runs before CSS extraction on purpose: background
/// `url(...)` references live in inline `style` attributes, and extraction
/// lifts those attributes into generated classes. Localizing first means
/// the synthesized rules already point at the local files.
pub struct PageCloner {
    page_url: Url,
    output_dir: PathBuf,
    download_images: bool,
    fetcher: Fetcher,
}

impl PageCloner {
    pub fn new(url: &str, output_dir: &Path, download_images: bool) -> Result<Self> {
        let page_url = Url::parse(url).with_context(|| format!("invalid URL: {}", url))?;

        let images_dir = output_dir.join("images");
        fs::create_dir_all(&images_dir)
            .with_context(|| format!("failed to create {}", images_dir.display()))?;

        Ok(Self {
            page_url,
            output_dir: output_dir.to_path_buf(),
            download_images,
            fetcher: Fetcher::new()?,
        })
    }

    pub async fn run(&self) -> Result<()> {
        info!("cloning {}", self.page_url);

        let progress = ProgressBar::new_spinner();
        progress.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner} {msg}")
                .unwrap(),
        );

        progress.set_message(format!("Fetching {}", self.page_url));
        let html = self
            .fetcher
            .fetch_page(&self.page_url)
            .await
            .with_context(|| format!("failed to fetch {}", self.page_url))?;
        info!("page fetched: {} bytes", html.len());

        let tree = dom::parse(&html);
        dom::ensure_structure(&tree);

        let (records, localized) = if self.download_images {
            progress.set_message("Localizing images");
            let mut localizer =
                ResourceLocalizer::new(&self.fetcher, &self.page_url, &self.output_dir);
            localizer.run(&tree).await;
            let localized = localizer.localized_count();
            (localizer.into_records(), localized)
        } else {
            info!("image localization disabled");
            (Vec::new(), 0)
        };

        progress.set_message("Extracting CSS");
        let mut extractor = StyleExtractor::new(&self.fetcher, &self.page_url);
        extractor.run(&tree).await;
        let css = extractor.into_css();

        sanitize(&tree);

        progress.set_message("Writing output");
        write_output(&tree, &css, &records, &self.page_url, &self.output_dir)?;
        progress.finish_and_clear();

        println!(
            "{} {}",
            "✅ Page cloned into".green().bold(),
            self.output_dir.display()
        );
        println!(
            "   {} image reference(s) localized, {} download(s) in manifest, {} bytes of CSS",
            localized,
            records.len(),
            css.len()
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_new_creates_output_layout() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("site");
        PageCloner::new("https://example.com", &out, true).unwrap();

        assert!(out.join("images").is_dir());
    }

    #[test]
    fn test_new_rejects_invalid_url() {
        let dir = tempdir().unwrap();
        assert!(PageCloner::new("not a url", dir.path(), true).is_err());
    }
}
