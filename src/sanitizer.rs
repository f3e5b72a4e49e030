use markup5ever_rcdom::{NodeData, RcDom};
use tracing::info;

use crate::dom;

/// Inline event handlers stripped from every element.
const EVENT_ATTRIBUTES: &[&str] = &[
    "onclick",
    "onload",
    "onsubmit",
    "onerror",
    "onmouseover",
    "onmouseout",
    "onchange",
    "onfocus",
    "onblur",
];

/// Strip active content: doctype declarations, comments, `<script>` elements
/// (with their bodies), inline event handlers, script-scheme and fragment
/// anchors, and form targets.
pub fn sanitize(dom: &RcDom) {
    let mut doomed = Vec::new();
    dom::walk(&dom.document, &mut |node| match &node.data {
        NodeData::Doctype { .. } | NodeData::Comment { .. } => doomed.push(node.clone()),
        NodeData::Element { name, .. } if name.local.as_ref() == "script" => {
            doomed.push(node.clone())
        }
        _ => {}
    });
    for node in &doomed {
        dom::detach(node);
    }

    for element in dom::all_elements(dom) {
        for event in EVENT_ATTRIBUTES {
            dom::remove_attr(&element, event);
        }

        if dom::is_element(&element, "a") {
            if let Some(href) = dom::get_attr(&element, "href") {
                if href.starts_with("javascript:")
                    || href.starts_with('#')
                    || href.starts_with("mailto:")
                {
                    dom::set_attr(&element, "href", "#");
                }
            }
        }

        if dom::is_element(&element, "form") && dom::get_attr(&element, "action").is_some() {
            dom::set_attr(&element, "action", "#");
        }
    }

    info!("HTML sanitized: {} node(s) removed", doomed.len());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripts_and_comments_removed() {
        let html = "<!DOCTYPE html><body><!-- note --><script>alert(1)</script><p>kept</p></body>";
        let tree = dom::parse(html);
        sanitize(&tree);

        let serialized = dom::serialize_pretty(&tree);
        assert!(!serialized.contains("DOCTYPE"));
        assert!(!serialized.contains("note"));
        assert!(!serialized.contains("script"));
        assert!(!serialized.contains("alert"));
        assert!(serialized.contains("kept"));
    }

    #[test]
    fn test_event_attributes_stripped() {
        let html = r#"<body onload="init()"><button onclick="go()" onmouseover="h()" title="ok">x</button></body>"#;
        let tree = dom::parse(html);
        sanitize(&tree);

        let body = dom::elements_by_name(&tree, "body").remove(0);
        assert_eq!(dom::get_attr(&body, "onload"), None);

        let button = dom::elements_by_name(&tree, "button").remove(0);
        assert_eq!(dom::get_attr(&button, "onclick"), None);
        assert_eq!(dom::get_attr(&button, "onmouseover"), None);
        assert_eq!(dom::get_attr(&button, "title").as_deref(), Some("ok"));
    }

    #[test]
    fn test_unsafe_hrefs_rewritten() {
        let html = r##"<body>
            <a href="javascript:void(0)">j</a>
            <a href="#top">f</a>
            <a href="mailto:x@example.com">m</a>
            <a href="https://example.com/page">kept</a>
            <a>bare</a>
        </body>"##;
        let tree = dom::parse(html);
        sanitize(&tree);

        let anchors = dom::elements_by_name(&tree, "a");
        assert_eq!(dom::get_attr(&anchors[0], "href").as_deref(), Some("#"));
        assert_eq!(dom::get_attr(&anchors[1], "href").as_deref(), Some("#"));
        assert_eq!(dom::get_attr(&anchors[2], "href").as_deref(), Some("#"));
        assert_eq!(
            dom::get_attr(&anchors[3], "href").as_deref(),
            Some("https://example.com/page")
        );
        assert_eq!(dom::get_attr(&anchors[4], "href"), None);
    }

    #[test]
    fn test_form_actions_neutralized() {
        let html = r#"<body><form action="/submit"><input type="text"></form><form>no action</form></body>"#;
        let tree = dom::parse(html);
        sanitize(&tree);

        let forms = dom::elements_by_name(&tree, "form");
        assert_eq!(dom::get_attr(&forms[0], "action").as_deref(), Some("#"));
        assert_eq!(dom::get_attr(&forms[1], "action"), None);
    }
}
