//! HTML to `Document` using lol_html's streaming parser
//!
//! lol_html does not build a tree, so element start handlers push onto an
//! open-element stack and end tag handlers pop it. Elements without an end
//! tag (void elements) are closed immediately. Input is expected to be
//! reasonably well formed; an unclosed element simply swallows the siblings
//! that follow it.

use std::cell::RefCell;
use std::rc::Rc;

use lol_html::{
    doc_comments, doc_text, element, rewrite_str, EndTagHandler, RewriteStrSettings,
};

use super::{Document, NodeId};
use crate::error::DomError;

/// Elements whose text is raw and must not be entity-decoded
const RAW_TEXT: &[&str] = &["script", "style"];

struct TreeBuilder {
    doc: Document,
    open: Vec<NodeId>,
}

impl TreeBuilder {
    fn new() -> Self {
        Self {
            doc: Document::new(),
            open: Vec::new(),
        }
    }

    fn current(&self) -> NodeId {
        self.open.last().copied().unwrap_or_else(|| self.doc.root())
    }

    fn open_element(&mut self, name: &str, attrs: Vec<(String, String)>) -> NodeId {
        let id = self.doc.create_element(name);
        for (key, value) in attrs {
            self.doc.set_attr(id, &key, &value);
        }
        let parent = self.current();
        // Fresh node, cannot be an ancestor of parent
        let _ = self.doc.append_child(parent, id);
        self.open.push(id);
        id
    }

    /// Pop up to and including `id`; implicitly closes anything left open inside it
    fn close_element(&mut self, id: NodeId) {
        if let Some(pos) = self.open.iter().rposition(|&n| n == id) {
            self.open.truncate(pos);
        }
    }

    fn push_text(&mut self, raw: &str) {
        if raw.is_empty() {
            return;
        }
        let parent = self.current();
        let raw_text = self
            .doc
            .tag_name(parent)
            .is_some_and(|name| RAW_TEXT.contains(&name));
        let text = if raw_text {
            raw.to_string()
        } else {
            html_escape::decode_html_entities(raw).into_owned()
        };

        // lol_html may deliver one text run in several chunks
        if let Some(&last) = self.doc.children(parent).last() {
            if let super::NodeData::Text(existing) = self.doc.data(last) {
                let merged = format!("{}{}", existing, text);
                self.doc.set_text(last, &merged);
                return;
            }
        }
        let node = self.doc.create_text(&text);
        let _ = self.doc.append_child(parent, node);
    }

    fn push_comment(&mut self, text: &str) {
        let parent = self.current();
        let node = self.doc.create_comment(text);
        let _ = self.doc.append_child(parent, node);
    }
}

pub(super) fn parse(html: &str) -> Result<Document, DomError> {
    let builder = Rc::new(RefCell::new(TreeBuilder::new()));

    let element_builder = Rc::clone(&builder);
    let text_builder = Rc::clone(&builder);
    let comment_builder = Rc::clone(&builder);

    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!("*", move |el| {
                let name = el.tag_name().to_ascii_lowercase();
                let attrs = el
                    .attributes()
                    .iter()
                    .map(|a| {
                        (
                            a.name().to_ascii_lowercase(),
                            html_escape::decode_html_entities(&a.value()).into_owned(),
                        )
                    })
                    .collect();

                let id = element_builder.borrow_mut().open_element(&name, attrs);

                match el.end_tag_handlers() {
                    Some(handlers) => {
                        let closer = Rc::clone(&element_builder);
                        let on_end: EndTagHandler<'static> = Box::new(move |_end| {
                            closer.borrow_mut().close_element(id);
                            Ok(())
                        });
                        handlers.push(on_end);
                    }
                    None => element_builder.borrow_mut().close_element(id),
                }
                Ok(())
            })],
            document_content_handlers: vec![
                doc_text!(move |chunk| {
                    text_builder.borrow_mut().push_text(chunk.as_str());
                    Ok(())
                }),
                doc_comments!(move |comment| {
                    comment_builder.borrow_mut().push_comment(&comment.text());
                    Ok(())
                }),
            ],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|e| DomError::Parse(e.to_string()))?;

    let doc = std::mem::take(&mut builder.borrow_mut().doc);
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_structure() {
        let doc = Document::parse_html(
            "<html><body><div id=\"main\"><p>hello <b>world</b></p><p>second</p></div></body></html>",
        )
        .unwrap();

        let body = doc.body();
        assert_eq!(doc.tag_name(body), Some("body"));
        assert_eq!(doc.text_content(body), "hello worldsecond");

        let main = doc.find_by_attribute("id", "main");
        assert_eq!(main.len(), 1);
        assert_eq!(doc.children(main[0]).len(), 2);
    }

    #[test]
    fn test_parse_void_elements() {
        let doc = Document::parse_html("<p>line one<br>line two</p><img src=\"a.png\"><p>after</p>")
            .unwrap();

        let top: Vec<_> = doc
            .children(doc.root())
            .iter()
            .filter_map(|&id| doc.tag_name(id))
            .collect();
        assert_eq!(top, vec!["p", "img", "p"]);
    }

    #[test]
    fn test_parse_decodes_entities() {
        let doc = Document::parse_html("<p title=\"a &amp; b\">fish &amp; chips</p>").unwrap();
        let p = doc.children(doc.root())[0];
        assert_eq!(doc.text_content(p), "fish & chips");
        assert_eq!(doc.attr(p, "title"), Some("a & b"));
    }

    #[test]
    fn test_parse_keeps_script_raw() {
        let doc = Document::parse_html("<div><script>if (a &amp;&amp; b) {}</script>text</div>")
            .unwrap();
        let div = doc.children(doc.root())[0];
        assert_eq!(doc.text_content(div), "text");
    }

    #[test]
    fn test_parse_round_trips_through_serializer() {
        let html = "<div class=\"x\"><p>hello world</p><!-- note --><br></div>";
        let doc = Document::parse_html(html).unwrap();
        assert_eq!(doc.to_html(), html);
    }
}
