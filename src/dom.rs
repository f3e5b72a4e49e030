use html5ever::parse_document;
use html5ever::tendril::TendrilSink;
use html5ever::{namespace_url, ns, Attribute, LocalName, QualName};
use markup5ever_rcdom::{Handle, Node, NodeData, RcDom};
use std::cell::RefCell;
use std::rc::Rc;

/// Elements serialized without a closing tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Parse raw HTML text into a mutable tree, tolerating malformed markup.
pub fn parse(html: &str) -> RcDom {
    parse_document(RcDom::default(), Default::default()).one(html)
}

/// Guarantee the tree has one `html` root with one `head` (first child) and
/// one `body` (last child). The tree builder already synthesizes these for
/// document parses; this covers trees assembled by hand.
pub fn ensure_structure(dom: &RcDom) {
    let document = dom.document.clone();
    let html = match child_element(&document, "html") {
        Some(html) => html,
        None => {
            let html = new_element("html", &[]);
            append_child(&document, &html);
            html
        }
    };

    if child_element(&html, "head").is_none() {
        prepend_child(&html, &new_element("head", &[]));
    }
    if child_element(&html, "body").is_none() {
        append_child(&html, &new_element("body", &[]));
    }
}

/// Depth-first pre-order visit. Children are snapshotted per node, so the
/// visitor may detach the node it is handed.
pub fn walk(node: &Handle, visit: &mut impl FnMut(&Handle)) {
    visit(node);
    let children = node.children.borrow().clone();
    for child in &children {
        walk(child, visit);
    }
}

/// All elements with the given tag name, in document order.
pub fn elements_by_name(dom: &RcDom, name: &str) -> Vec<Handle> {
    let mut found = Vec::new();
    walk(&dom.document, &mut |node| {
        if is_element(node, name) {
            found.push(node.clone());
        }
    });
    found
}

/// All elements carrying the given attribute, in document order.
pub fn elements_with_attr(dom: &RcDom, attr: &str) -> Vec<Handle> {
    let mut found = Vec::new();
    walk(&dom.document, &mut |node| {
        if matches!(node.data, NodeData::Element { .. }) && get_attr(node, attr).is_some() {
            found.push(node.clone());
        }
    });
    found
}

/// Every element in the tree, in document order.
pub fn all_elements(dom: &RcDom) -> Vec<Handle> {
    let mut found = Vec::new();
    walk(&dom.document, &mut |node| {
        if matches!(node.data, NodeData::Element { .. }) {
            found.push(node.clone());
        }
    });
    found
}

pub fn is_element(node: &Handle, tag: &str) -> bool {
    matches!(&node.data, NodeData::Element { name, .. } if name.local.as_ref() == tag)
}

pub fn get_attr(node: &Handle, attr: &str) -> Option<String> {
    if let NodeData::Element { attrs, .. } = &node.data {
        attrs
            .borrow()
            .iter()
            .find(|a| a.name.local.as_ref() == attr)
            .map(|a| a.value.to_string())
    } else {
        None
    }
}

pub fn set_attr(node: &Handle, attr: &str, value: &str) {
    if let NodeData::Element { attrs, .. } = &node.data {
        let mut attrs = attrs.borrow_mut();
        if let Some(existing) = attrs.iter_mut().find(|a| a.name.local.as_ref() == attr) {
            existing.value = value.into();
        } else {
            attrs.push(Attribute {
                name: QualName::new(None, ns!(), LocalName::from(attr)),
                value: value.into(),
            });
        }
    }
}

pub fn remove_attr(node: &Handle, attr: &str) -> bool {
    if let NodeData::Element { attrs, .. } = &node.data {
        let mut attrs = attrs.borrow_mut();
        let before = attrs.len();
        attrs.retain(|a| a.name.local.as_ref() != attr);
        attrs.len() != before
    } else {
        false
    }
}

/// Concatenated text of the node's subtree.
pub fn text_content(node: &Handle) -> String {
    let mut text = String::new();
    walk(node, &mut |n| {
        if let NodeData::Text { contents } = &n.data {
            text.push_str(&contents.borrow());
        }
    });
    text
}

/// Remove the node from its parent, dropping its whole subtree from the
/// document.
pub fn detach(node: &Handle) {
    if let Some(weak) = node.parent.take() {
        if let Some(parent) = weak.upgrade() {
            parent
                .children
                .borrow_mut()
                .retain(|child| !Rc::ptr_eq(child, node));
        }
    }
}

pub fn append_child(parent: &Handle, child: &Handle) {
    child.parent.set(Some(Rc::downgrade(parent)));
    parent.children.borrow_mut().push(child.clone());
}

pub fn prepend_child(parent: &Handle, child: &Handle) {
    child.parent.set(Some(Rc::downgrade(parent)));
    parent.children.borrow_mut().insert(0, child.clone());
}

pub fn new_element(tag: &str, attrs: &[(&str, &str)]) -> Handle {
    Node::new(NodeData::Element {
        name: QualName::new(None, ns!(html), LocalName::from(tag)),
        attrs: RefCell::new(
            attrs
                .iter()
                .map(|(name, value)| Attribute {
                    name: QualName::new(None, ns!(), LocalName::from(*name)),
                    value: (*value).into(),
                })
                .collect(),
        ),
        template_contents: RefCell::new(None),
        mathml_annotation_xml_integration_point: false,
    })
}

pub fn new_comment(text: &str) -> Handle {
    Node::new(NodeData::Comment {
        contents: text.into(),
    })
}

fn child_element(parent: &Handle, tag: &str) -> Option<Handle> {
    parent
        .children
        .borrow()
        .iter()
        .find(|child| is_element(child, tag))
        .cloned()
}

/// Serialize the tree to indented HTML text, one element or text run per
/// line. Insignificant whitespace-only text nodes are dropped.
pub fn serialize_pretty(dom: &RcDom) -> String {
    let mut out = String::new();
    for child in dom.document.children.borrow().iter() {
        pretty_node(child, 0, &mut out);
    }
    out
}

fn pretty_node(node: &Handle, depth: usize, out: &mut String) {
    match &node.data {
        NodeData::Element { name, attrs, .. } => {
            let tag = name.local.as_ref();
            indent(out, depth);
            out.push('<');
            out.push_str(tag);
            for attr in attrs.borrow().iter() {
                out.push(' ');
                out.push_str(attr.name.local.as_ref());
                out.push_str("=\"");
                out.push_str(&escape_attr(&attr.value));
                out.push('"');
            }
            if VOID_ELEMENTS.contains(&tag) {
                out.push_str("/>\n");
                return;
            }
            out.push_str(">\n");
            for child in node.children.borrow().iter() {
                pretty_node(child, depth + 1, out);
            }
            indent(out, depth);
            out.push_str("</");
            out.push_str(tag);
            out.push_str(">\n");
        }
        NodeData::Text { contents } => {
            let contents = contents.borrow();
            let trimmed = contents.trim();
            if !trimmed.is_empty() {
                indent(out, depth);
                out.push_str(&escape_text(trimmed));
                out.push('\n');
            }
        }
        NodeData::Comment { contents } => {
            indent(out, depth);
            out.push_str("<!--");
            out.push_str(contents);
            out.push_str("-->\n");
        }
        NodeData::Doctype { name, .. } => {
            indent(out, depth);
            out.push_str("<!DOCTYPE ");
            out.push_str(name);
            out.push_str(">\n");
        }
        _ => {}
    }
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attr(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}
