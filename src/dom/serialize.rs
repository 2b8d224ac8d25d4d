//! `Document` to HTML

use super::{Document, NodeData, NodeId};

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

pub(super) fn serialize_children(doc: &Document, id: NodeId) -> String {
    let mut out = String::new();
    for &child in doc.children(id) {
        write_node(doc, child, &mut out);
    }
    out
}

pub(super) fn serialize_node(doc: &Document, id: NodeId) -> String {
    let mut out = String::new();
    write_node(doc, id, &mut out);
    out
}

fn write_node(doc: &Document, id: NodeId, out: &mut String) {
    match doc.data(id) {
        NodeData::Document => {
            for &child in doc.children(id) {
                write_node(doc, child, out);
            }
        }
        NodeData::Text(text) => {
            let raw = doc
                .parent(id)
                .and_then(|p| doc.tag_name(p))
                .is_some_and(|name| RAW_TEXT_ELEMENTS.contains(&name));
            if raw {
                out.push_str(text);
            } else {
                out.push_str(&html_escape::encode_text(text));
            }
        }
        NodeData::Comment(text) => {
            out.push_str("<!--");
            out.push_str(text);
            out.push_str("-->");
        }
        NodeData::Element(el) => {
            out.push('<');
            out.push_str(&el.name);
            for (key, value) in &el.attrs {
                out.push(' ');
                out.push_str(key);
                out.push_str("=\"");
                out.push_str(&html_escape::encode_double_quoted_attribute(value));
                out.push('"');
            }
            out.push('>');

            if VOID_ELEMENTS.contains(&el.name.as_str()) {
                return;
            }
            for &child in doc.children(id) {
                write_node(doc, child, out);
            }
            out.push_str("</");
            out.push_str(&el.name);
            out.push('>');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escapes_text_and_attributes() {
        let mut doc = Document::new();
        let p = doc
            .append_element_with_text(doc.root(), "p", "1 < 2 & 3")
            .unwrap();
        doc.set_attr(p, "title", "say \"hi\"");

        assert_eq!(
            doc.to_html(),
            "<p title=\"say &quot;hi&quot;\">1 &lt; 2 &amp; 3</p>"
        );
    }

    #[test]
    fn test_outer_html_of_detached_node() {
        let mut doc = Document::new();
        let em = doc.create_element("em");
        let text = doc.create_text("loose");
        doc.append_child(em, text).unwrap();

        assert_eq!(doc.outer_html(em), "<em>loose</em>");
        assert_eq!(doc.to_html(), "");
    }
}
