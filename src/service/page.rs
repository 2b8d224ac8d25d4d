//! The host page an annotation service is attached to

use parking_lot::{Mutex, MutexGuard};
use tokio::sync::watch;

use crate::dom::Document;
use crate::error::DomError;

/// A live document plus the identity of the page it came from.
///
/// Host-side edits go through `mutate`, which bumps a revision counter that
/// change watchers subscribe to. Marker writes made by the service itself
/// do not signal.
pub struct Page {
    url: String,
    title: String,
    document: Mutex<Document>,
    revision: watch::Sender<u64>,
}

impl Page {
    pub fn new(url: &str, title: &str, document: Document) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            url: url.to_string(),
            title: title.to_string(),
            document: Mutex::new(document),
            revision,
        }
    }

    /// Parse `html`; the title comes from the first `<title>` element
    pub fn from_html(url: &str, html: &str) -> Result<Self, DomError> {
        let document = Document::parse_html(html)?;
        let title = document
            .descendants(document.root())
            .find(|&id| document.tag_name(id) == Some("title"))
            .map(|id| {
                document
                    .children(id)
                    .iter()
                    .map(|&c| match document.data(c) {
                        crate::dom::NodeData::Text(t) => t.as_str(),
                        _ => "",
                    })
                    .collect::<String>()
            })
            .unwrap_or_default();

        Ok(Self::new(url, title.trim(), document))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Read the document
    pub fn read<R>(&self, f: impl FnOnce(&Document) -> R) -> R {
        f(&self.document.lock())
    }

    /// Apply a host-side edit and signal watchers
    pub fn mutate<R>(&self, f: impl FnOnce(&mut Document) -> R) -> R {
        let result = f(&mut self.document.lock());
        self.revision.send_modify(|rev| *rev = rev.wrapping_add(1));
        result
    }

    /// Direct access for marker writes. Never held across an await.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Document> {
        self.document.lock()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// Mutation signal consumed by the change watcher
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn to_html(&self) -> String {
        self.document.lock().to_html()
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("url", &self.url)
            .field("title", &self.title)
            .field("revision", &self.revision())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_html_reads_title() {
        let page = Page::from_html(
            "https://example.com/a",
            "<html><head><title> Example </title></head><body><p>hi</p></body></html>",
        )
        .unwrap();
        assert_eq!(page.title(), "Example");
        assert_eq!(page.url(), "https://example.com/a");
    }

    #[test]
    fn test_mutate_bumps_revision() {
        let page = Page::from_html("https://example.com/", "<p>one</p>").unwrap();
        let rx = page.subscribe();
        assert_eq!(page.revision(), 0);

        let root = page.read(|doc| doc.root());
        page.mutate(|doc| {
            doc.append_element_with_text(root, "p", "two").unwrap();
        });

        assert_eq!(page.revision(), 1);
        assert!(rx.has_changed().unwrap());
        assert_eq!(page.to_html(), "<p>one</p><p>two</p>");
    }

    #[test]
    fn test_internal_lock_does_not_signal() {
        let page = Page::from_html("https://example.com/", "<p>one</p>").unwrap();
        {
            let mut doc = page.lock();
            let root = doc.root();
            doc.append_element_with_text(root, "p", "two").unwrap();
        }
        assert_eq!(page.revision(), 0);
    }
}
