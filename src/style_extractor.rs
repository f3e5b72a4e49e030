use lazy_static::lazy_static;
use markup5ever_rcdom::RcDom;
use regex::Regex;
use tracing::{debug, info};
use url::Url;

use crate::dom;
use crate::fetcher::Fetcher;

lazy_static! {
    static ref CSS_COMMENT_RE: Regex = Regex::new(r"(?s)/\*.*?\*/").unwrap();
    static ref EMPTY_RULE_RE: Regex = Regex::new(r"[^{}]+\{\s*\}").unwrap();
}

/// Pulls every `<style>` block, linked stylesheet and inline `style`
/// attribute out of the tree and into one ordered CSS blob. After `run`,
/// the tree holds no `<style>` or stylesheet `<link>` elements, and every
/// formerly inline-styled element carries a generated `sinyfy-inline-<n>`
/// class instead.
pub struct StyleExtractor<'a> {
    fetcher: &'a Fetcher,
    page_url: &'a Url,
    parts: Vec<String>,
    inline_rules: Vec<String>,
}

impl<'a> StyleExtractor<'a> {
    pub fn new(fetcher: &'a Fetcher, page_url: &'a Url) -> Self {
        Self {
            fetcher,
            page_url,
            parts: Vec::new(),
            inline_rules: Vec::new(),
        }
    }

    pub async fn run(&mut self, dom: &RcDom) {
        self.collect_style_tags(dom);
        self.collect_linked_stylesheets(dom).await;
        self.collect_inline_styles(dom);

        info!(
            "CSS extracted: {} source(s), {} inline rule(s)",
            self.parts.len(),
            self.inline_rules.len()
        );
    }

    /// Merged stylesheet: tag/linked fragments in encounter order, then the
    /// synthesized inline-style rules.
    pub fn into_css(self) -> String {
        let mut css = self.parts.join("\n\n");
        if !self.inline_rules.is_empty() {
            if !css.is_empty() {
                css.push_str("\n\n");
            }
            css.push_str("/* Inline styles */\n");
            css.push_str(&self.inline_rules.join("\n"));
        }
        css
    }

    fn collect_style_tags(&mut self, dom: &RcDom) {
        for style in dom::elements_by_name(dom, "style") {
            let text = dom::text_content(&style);
            if !text.trim().is_empty() {
                self.parts
                    .push(format!("/* From <style> tag */\n{}", clean_css(&text)));
            }
            dom::detach(&style);
        }
    }

    async fn collect_linked_stylesheets(&mut self, dom: &RcDom) {
        for link in dom::elements_by_name(dom, "link") {
            let rel = dom::get_attr(&link, "rel").unwrap_or_default();
            if !rel.to_ascii_lowercase().contains("stylesheet") {
                continue;
            }

            if let Some(href) = dom::get_attr(&link, "href").filter(|h| !h.is_empty()) {
                match self.page_url.join(&href) {
                    Ok(css_url) => match self.fetcher.fetch_text(&css_url).await {
                        Ok(text) => {
                            self.parts.push(format!("/* Source: {} */\n{}", css_url, text));
                        }
                        Err(err) => debug!("stylesheet {} skipped: {}", css_url, err),
                    },
                    Err(err) => debug!("stylesheet href {:?} not resolvable: {}", href, err),
                }
            }
            // the link is dead weight whether or not the fetch worked
            dom::detach(&link);
        }
    }

    fn collect_inline_styles(&mut self, dom: &RcDom) {
        for element in dom::elements_with_attr(dom, "style") {
            let declarations = dom::get_attr(&element, "style").unwrap_or_default();
            let class_name = format!("sinyfy-inline-{}", self.inline_rules.len() + 1);

            match dom::get_attr(&element, "class") {
                Some(existing) if !existing.trim().is_empty() => {
                    dom::set_attr(&element, "class", &format!("{} {}", existing, class_name));
                }
                _ => dom::set_attr(&element, "class", &class_name),
            }

            self.inline_rules
                .push(format!(".{} {{\n  {};\n}}", class_name, declarations));
            dom::remove_attr(&element, "style");
        }
    }
}

/// Strip CSS comments and rules with empty bodies.
pub fn clean_css(css: &str) -> String {
    let without_comments = CSS_COMMENT_RE.replace_all(css, "");
    EMPTY_RULE_RE.replace_all(&without_comments, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn extract(fetcher: &Fetcher, page_url: &Url, html: &str) -> (RcDom, String) {
        let dom = dom::parse(html);
        let mut extractor = StyleExtractor::new(fetcher, page_url);
        extractor.run(&dom).await;
        let css = extractor.into_css();
        (dom, css)
    }

    #[test]
    fn test_clean_css_strips_comments() {
        let css = "body { color: red; } /* gone\nacross lines */ p { margin: 0; }";
        let cleaned = clean_css(css);
        assert!(!cleaned.contains("gone"));
        assert!(cleaned.contains("body { color: red; }"));
        assert!(cleaned.contains("p { margin: 0; }"));
    }

    #[test]
    fn test_clean_css_strips_empty_rules() {
        let css = ".empty {}\n.kept { color: blue; }";
        let cleaned = clean_css(css);
        assert!(!cleaned.contains(".empty"));
        assert!(cleaned.contains(".kept { color: blue; }"));
    }

    #[tokio::test]
    async fn test_style_tags_are_merged_and_removed() {
        let fetcher = Fetcher::new().unwrap();
        let page_url = Url::parse("https://example.com/").unwrap();
        let html = "<head><style>body { color: red; }</style><style></style></head><body></body>";

        let (dom, css) = extract(&fetcher, &page_url, html).await;

        assert!(dom::elements_by_name(&dom, "style").is_empty());
        assert!(css.contains("/* From <style> tag */"));
        assert!(css.contains("body { color: red; }"));
    }

    #[tokio::test]
    async fn test_inline_style_becomes_class() {
        let fetcher = Fetcher::new().unwrap();
        let page_url = Url::parse("https://example.com/").unwrap();
        let html = r#"<body><div style="color: red">a</div><p class="note" style="margin: 0">b</p></body>"#;

        let (dom, css) = extract(&fetcher, &page_url, html).await;

        let div = dom::elements_by_name(&dom, "div").remove(0);
        assert_eq!(dom::get_attr(&div, "style"), None);
        assert_eq!(dom::get_attr(&div, "class").as_deref(), Some("sinyfy-inline-1"));

        let p = dom::elements_by_name(&dom, "p").remove(0);
        assert_eq!(dom::get_attr(&p, "style"), None);
        assert_eq!(
            dom::get_attr(&p, "class").as_deref(),
            Some("note sinyfy-inline-2")
        );

        assert!(css.contains("/* Inline styles */"));
        assert!(css.contains(".sinyfy-inline-1 {\n  color: red;\n}"));
        assert!(css.contains(".sinyfy-inline-2 {\n  margin: 0;\n}"));
    }

    #[tokio::test]
    async fn test_linked_stylesheet_fetched_and_link_removed() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/css/site.css")
            .with_status(200)
            .with_header("content-type", "text/css")
            .with_body("h1 { color: green; }")
            .create_async()
            .await;

        let fetcher = Fetcher::new().unwrap();
        let page_url = Url::parse(&server.url()).unwrap();
        let html = r#"<head><link rel="stylesheet" href="/css/site.css"></head><body></body>"#;

        let dom = dom::parse(html);
        let mut extractor = StyleExtractor::new(&fetcher, &page_url);
        extractor.run(&dom).await;
        let css = extractor.into_css();

        mock.assert_async().await;
        assert!(dom::elements_by_name(&dom, "link").is_empty());
        assert!(css.contains("/* Source: "));
        assert!(css.contains("/css/site.css */"));
        assert!(css.contains("h1 { color: green; }"));
    }

    #[tokio::test]
    async fn test_failed_stylesheet_is_skipped_silently() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/broken.css")
            .with_status(404)
            .create_async()
            .await;

        let fetcher = Fetcher::new().unwrap();
        let page_url = Url::parse(&server.url()).unwrap();
        let html = r#"<head><link rel="stylesheet" href="/broken.css"></head><body></body>"#;

        let dom = dom::parse(html);
        let mut extractor = StyleExtractor::new(&fetcher, &page_url);
        extractor.run(&dom).await;
        let css = extractor.into_css();

        // the link is gone and no CSS fragment was appended
        assert!(dom::elements_by_name(&dom, "link").is_empty());
        assert!(css.is_empty());
    }

    #[tokio::test]
    async fn test_non_stylesheet_links_are_kept() {
        let fetcher = Fetcher::new().unwrap();
        let page_url = Url::parse("https://example.com/").unwrap();
        let html = r#"<head><link rel="icon" href="/favicon.ico"></head><body></body>"#;

        let (dom, css) = extract(&fetcher, &page_url, html).await;

        assert_eq!(dom::elements_by_name(&dom, "link").len(), 1);
        assert!(css.is_empty());
    }
}
