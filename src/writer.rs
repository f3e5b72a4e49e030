use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use markup5ever_rcdom::RcDom;
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::info;
use url::Url;

use crate::dom;
use crate::resource_localizer::ResourceRecord;

pub const GENERATOR: &str = concat!("sinyfy v", env!("CARGO_PKG_VERSION"));
pub const AUTHOR: &str = "thetemirbolatov";

#[derive(Serialize)]
struct Manifest<'a> {
    generator: &'static str,
    author: &'static str,
    url: &'a str,
    date: String,
    resources: &'a [ResourceRecord],
}

/// Persist the finished page: rewrite `<head>` to reference the merged
/// stylesheet, then write `index.html`, `style.css` (when any CSS was
/// found) and `manifest.json` under the output directory.
pub fn write_output(
    tree: &RcDom,
    css: &str,
    resources: &[ResourceRecord],
    page_url: &Url,
    output_dir: &Path,
) -> Result<()> {
    relink_stylesheet(tree)?;

    let html_path = output_dir.join("index.html");
    fs::write(&html_path, dom::serialize_pretty(tree))
        .with_context(|| format!("failed to write {}", html_path.display()))?;
    info!("HTML: {}", html_path.display());

    if !css.is_empty() {
        let css_path = output_dir.join("style.css");
        fs::write(&css_path, css)
            .with_context(|| format!("failed to write {}", css_path.display()))?;
        info!("CSS: {}", css_path.display());
    }

    let manifest = Manifest {
        generator: GENERATOR,
        author: AUTHOR,
        url: page_url.as_str(),
        date: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        resources,
    };
    let manifest_path = output_dir.join("manifest.json");
    fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)
        .with_context(|| format!("failed to write {}", manifest_path.display()))?;
    info!("manifest: {}", manifest_path.display());

    Ok(())
}

/// Drop any stylesheet `<link>` the extractor missed and point the page at
/// the merged `style.css`, with an attribution comment after it.
fn relink_stylesheet(tree: &RcDom) -> Result<()> {
    for link in dom::elements_by_name(tree, "link") {
        let rel = dom::get_attr(&link, "rel").unwrap_or_default();
        if rel.to_ascii_lowercase().contains("stylesheet") {
            dom::detach(&link);
        }
    }

    let head = dom::elements_by_name(tree, "head")
        .into_iter()
        .next()
        .context("document has no <head>")?;

    dom::append_child(
        &head,
        &dom::new_element("link", &[("rel", "stylesheet"), ("href", "style.css")]),
    );
    dom::append_child(
        &head,
        &dom::new_comment(&format!(" {} by {} ", GENERATOR, AUTHOR)),
    );

    Ok(())
}
