use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::{Rgb, RgbImage};
use lazy_static::lazy_static;
use markup5ever_rcdom::{Handle, RcDom};
use regex::Regex;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use url::Url;

use crate::dom;
use crate::fetcher::Fetcher;

const VALID_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".webp", ".svg"];

const PLACEHOLDER_WIDTH: u32 = 200;
const PLACEHOLDER_HEIGHT: u32 = 150;

lazy_static! {
    static ref DATA_URI_RE: Regex =
        Regex::new(r"(?s)^data:image/([a-zA-Z0-9.+-]+);base64,(.+)$").unwrap();
    static ref URL_REF_RE: Regex = Regex::new(r#"url\(['"]?([^'")]+)['"]?\)"#).unwrap();
}

/// One successfully downloaded image, as recorded in the manifest.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    pub local: String,
    pub size: u64,
}

/// Rewrites every image reference in the tree to a file under `images/`.
///
/// `<img>` sources are downloaded (or decoded, for data URIs); a failed
/// element gets a generated placeholder graphic instead. Background
/// `url(...)` references inside inline `style` attributes are downloaded
/// too, keeping their remote URL on failure. One counter numbers every
/// generated file, so this stage must run before inline styles are lifted
/// into classes.
pub struct ResourceLocalizer<'a> {
    fetcher: &'a Fetcher,
    page_url: &'a Url,
    images_dir: PathBuf,
    counter: u32,
    records: Vec<ResourceRecord>,
}

impl<'a> ResourceLocalizer<'a> {
    pub fn new(fetcher: &'a Fetcher, page_url: &'a Url, output_dir: &Path) -> Self {
        Self {
            fetcher,
            page_url,
            images_dir: output_dir.join("images"),
            counter: 1,
            records: Vec::new(),
        }
    }

    pub async fn run(&mut self, dom: &RcDom) {
        let images = dom::elements_by_name(dom, "img");
        info!("processing {} image element(s)", images.len());

        for img in &images {
            let src = match dom::get_attr(img, "src") {
                Some(src) if !src.is_empty() => src,
                _ => continue,
            };

            let n = self.next_id();
            if src.starts_with("data:") {
                if !self.localize_data_uri(img, &src, n) {
                    self.write_placeholder(img, n);
                }
            } else {
                self.localize_remote(img, &src, n).await;
            }
        }

        self.localize_backgrounds(dom).await;
    }

    pub fn into_records(self) -> Vec<ResourceRecord> {
        self.records
    }

    /// Number of counter slots handed out so far (images + backgrounds).
    pub fn localized_count(&self) -> u32 {
        self.counter - 1
    }

    fn next_id(&mut self) -> u32 {
        let n = self.counter;
        self.counter += 1;
        n
    }

    /// Decode an embedded base64 image to a local file. Returns false when
    /// the URI doesn't parse, the payload doesn't decode, or the file can't
    /// be written; the caller falls back to a placeholder.
    fn localize_data_uri(&mut self, img: &Handle, src: &str, n: u32) -> bool {
        let Some(caps) = DATA_URI_RE.captures(src) else {
            debug!("unsupported data URI on <img>");
            return false;
        };
        let format = caps[1].to_string();
        let payload: String = caps[2]
            .chars()
            .filter(|c| !c.is_ascii_whitespace())
            .collect();

        let bytes = match BASE64.decode(payload.as_bytes()) {
            Ok(bytes) => bytes,
            Err(err) => {
                debug!("data URI payload did not decode: {}", err);
                return false;
            }
        };

        let filename = format!("image_data_{:04}.{}", n, format);
        if let Err(err) = fs::write(self.images_dir.join(&filename), &bytes) {
            debug!("could not write decoded data URI: {}", err);
            return false;
        }

        dom::set_attr(img, "src", &format!("images/{}", filename));
        true
    }

    async fn localize_remote(&mut self, img: &Handle, src: &str, n: u32) {
        let full_url = match self.page_url.join(src) {
            Ok(url) => url,
            Err(err) => {
                debug!("image src {:?} not resolvable: {}", src, err);
                self.write_placeholder(img, n);
                return;
            }
        };

        let filename = format!("image_{:04}{}", n, extension_for(&full_url));
        let dest = self.images_dir.join(&filename);

        match self.fetcher.download(&full_url, &dest).await {
            Ok(size) => {
                let local = format!("images/{}", filename);
                dom::set_attr(img, "src", &local);
                // best effort, a file that won't decode just gets no dimensions
                if let Ok((width, height)) = image::image_dimensions(&dest) {
                    dom::set_attr(img, "width", &width.to_string());
                    dom::set_attr(img, "height", &height.to_string());
                }
                self.records.push(ResourceRecord {
                    kind: "image".to_string(),
                    url: full_url.to_string(),
                    local,
                    size,
                });
            }
            Err(err) => {
                debug!("image {} failed: {}", full_url, err);
                self.write_placeholder(img, n);
            }
        }
    }

    /// Download `url(...)` references out of inline `style` attributes that
    /// mention a background. Successful downloads replace the URL text in
    /// place; failures keep the remote URL (no placeholder for backgrounds).
    async fn localize_backgrounds(&mut self, dom: &RcDom) {
        for element in dom::elements_with_attr(dom, "style") {
            let style = dom::get_attr(&element, "style").unwrap_or_default();
            if !style.contains("background") {
                continue;
            }

            let references: Vec<String> = URL_REF_RE
                .captures_iter(&style)
                .map(|caps| caps[1].to_string())
                .collect();

            let mut updated = style.clone();
            for reference in references {
                if reference.starts_with("data:") {
                    continue;
                }

                let n = self.next_id();
                let full_url = match self.page_url.join(&reference) {
                    Ok(url) => url,
                    Err(err) => {
                        debug!("background url {:?} not resolvable: {}", reference, err);
                        continue;
                    }
                };

                let filename = format!("bg_{:04}{}", n, extension_for(&full_url));
                match self
                    .fetcher
                    .download(&full_url, &self.images_dir.join(&filename))
                    .await
                {
                    Ok(_) => {
                        updated = updated.replace(&reference, &format!("images/{}", filename));
                    }
                    Err(err) => debug!("background {} left in place: {}", full_url, err),
                }
            }

            if updated != style {
                dom::set_attr(&element, "style", &updated);
            }
        }
    }

    fn write_placeholder(&mut self, img: &Handle, n: u32) {
        let filename = format!("placeholder_{:04}.png", n);
        let dest = self.images_dir.join(&filename);

        if let Err(err) = render_placeholder(&dest) {
            debug!("placeholder render failed, writing empty file: {}", err);
            let _ = fs::write(&dest, b"");
        }

        dom::set_attr(img, "src", &format!("images/{}", filename));
        dom::set_attr(img, "data-sinyfy", "placeholder");
    }
}

/// File extension for a remote image URL, restricted to a known set.
fn extension_for(url: &Url) -> &'static str {
    let path = url.path().to_ascii_lowercase();
    VALID_EXTENSIONS
        .iter()
        .find(|ext| path.ends_with(*ext))
        .copied()
        .unwrap_or(".png")
}

/// 200x150 "NO IMAGE" graphic: light gray fill, border, corner-to-corner X,
/// centered label.
fn render_placeholder(path: &Path) -> image::ImageResult<()> {
    let fill = Rgb([0xf0, 0xf0, 0xf0]);
    let frame = Rgb([0xcc, 0xcc, 0xcc]);
    let ink = Rgb([0x66, 0x66, 0x66]);

    let mut canvas = RgbImage::from_pixel(PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT, fill);

    for x in 0..PLACEHOLDER_WIDTH {
        for t in 0..2 {
            canvas.put_pixel(x, t, frame);
            canvas.put_pixel(x, PLACEHOLDER_HEIGHT - 1 - t, frame);
        }
    }
    for y in 0..PLACEHOLDER_HEIGHT {
        for t in 0..2 {
            canvas.put_pixel(t, y, frame);
            canvas.put_pixel(PLACEHOLDER_WIDTH - 1 - t, y, frame);
        }
    }
    for x in 0..PLACEHOLDER_WIDTH {
        let y = x * (PLACEHOLDER_HEIGHT - 1) / (PLACEHOLDER_WIDTH - 1);
        canvas.put_pixel(x, y, frame);
        canvas.put_pixel(x, PLACEHOLDER_HEIGHT - 1 - y, frame);
    }

    draw_label(&mut canvas, "NO IMAGE", ink);
    canvas.save(path)
}

const GLYPH_SCALE: u32 = 2;
const GLYPH_GAP: u32 = 2;

/// 5x7 bitmap glyphs, just enough for the placeholder label.
fn glyph(c: char) -> [u8; 7] {
    match c {
        'N' => [
            0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001, 0b10001,
        ],
        'O' => [
            0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110,
        ],
        'I' => [
            0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110,
        ],
        'M' => [
            0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001,
        ],
        'A' => [
            0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001,
        ],
        'G' => [
            0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01110,
        ],
        'E' => [
            0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111,
        ],
        _ => [0; 7],
    }
}

fn draw_label(canvas: &mut RgbImage, label: &str, color: Rgb<u8>) {
    let advance = 5 * GLYPH_SCALE + GLYPH_GAP;
    let label_width = label.len() as u32 * advance - GLYPH_GAP;
    let label_height = 7 * GLYPH_SCALE;
    let x0 = canvas.width().saturating_sub(label_width) / 2;
    let y0 = canvas.height().saturating_sub(label_height) / 2;

    for (i, c) in label.chars().enumerate() {
        let rows = glyph(c);
        let gx = x0 + i as u32 * advance;
        for (row_index, row) in rows.iter().enumerate() {
            for col in 0..5u32 {
                if *row & (0b10000 >> col) == 0 {
                    continue;
                }
                for dy in 0..GLYPH_SCALE {
                    for dx in 0..GLYPH_SCALE {
                        let px = gx + col * GLYPH_SCALE + dx;
                        let py = y0 + row_index as u32 * GLYPH_SCALE + dy;
                        if px < canvas.width() && py < canvas.height() {
                            canvas.put_pixel(px, py, color);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_extension_for_known_and_unknown() {
        let cases = [
            ("https://example.com/a/photo.JPG", ".jpg"),
            ("https://example.com/pic.jpeg", ".jpeg"),
            ("https://example.com/anim.gif?v=2", ".gif"),
            ("https://example.com/modern.webp", ".webp"),
            ("https://example.com/vector.svg", ".svg"),
            ("https://example.com/no-extension", ".png"),
            ("https://example.com/archive.tar.gz", ".png"),
        ];

        for (url, expected) in cases {
            let url = Url::parse(url).unwrap();
            assert_eq!(extension_for(&url), expected, "for {url}");
        }
    }

    #[test]
    fn test_render_placeholder_dimensions_and_colors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("placeholder.png");
        render_placeholder(&path).unwrap();

        assert_eq!(image::image_dimensions(&path).unwrap(), (200, 150));

        let img = image::open(&path).unwrap().to_rgb8();
        // border pixel, interior fill pixel
        assert_eq!(img.get_pixel(0, 0), &Rgb([0xcc, 0xcc, 0xcc]));
        assert_eq!(img.get_pixel(10, 10), &Rgb([0xf0, 0xf0, 0xf0]));
    }

    #[test]
    fn test_data_uri_regex_shapes() {
        let caps = DATA_URI_RE
            .captures("data:image/png;base64,AAAA")
            .unwrap();
        assert_eq!(&caps[1], "png");
        assert_eq!(&caps[2], "AAAA");

        assert!(DATA_URI_RE.captures("data:text/plain;base64,AAAA").is_none());
        assert!(DATA_URI_RE.captures("data:image/png,plain").is_none());
    }

    #[test]
    fn test_url_reference_regex_quote_styles() {
        let style = "background: url('/a.png'), url(\"/b.jpg\"), url(/c.gif)";
        let refs: Vec<&str> = URL_REF_RE
            .captures_iter(style)
            .map(|c| c.get(1).unwrap().as_str())
            .collect();
        assert_eq!(refs, vec!["/a.png", "/b.jpg", "/c.gif"]);
    }
}
