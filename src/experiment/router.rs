//! Routing of documents to per-kind handlers.

use super::document::{Document, DocumentKind};
use crate::error::ExportResult;
use tracing::debug;

/// A consumer of a run's document stream.
///
/// `route` dispatches each document to the handler for its kind. Every handler
/// defaults to accepting the document and doing nothing, so implementors only
/// override the kinds they care about.
pub trait DocumentRouter {
    /// Dispatch `doc` to the handler for `kind`.
    fn route(&mut self, kind: DocumentKind, doc: Document) -> ExportResult<()> {
        debug!(%kind, uid = doc.uid().unwrap_or(""), "routing document");
        match kind {
            DocumentKind::Start => self.start(doc),
            DocumentKind::Descriptor => self.descriptor(doc),
            DocumentKind::Event => self.event(doc),
            DocumentKind::EventPage => self.event_page(doc),
            DocumentKind::Resource => self.resource(doc),
            DocumentKind::Datum => self.datum(doc),
            DocumentKind::DatumPage => self.datum_page(doc),
            DocumentKind::Stop => self.stop(doc),
        }
    }

    /// Handle a run start.
    fn start(&mut self, _doc: Document) -> ExportResult<()> {
        Ok(())
    }

    /// Handle a stream descriptor.
    fn descriptor(&mut self, _doc: Document) -> ExportResult<()> {
        Ok(())
    }

    /// Handle one event.
    fn event(&mut self, _doc: Document) -> ExportResult<()> {
        Ok(())
    }

    /// Handle an event page.
    fn event_page(&mut self, _doc: Document) -> ExportResult<()> {
        Ok(())
    }

    /// Handle a resource.
    fn resource(&mut self, _doc: Document) -> ExportResult<()> {
        Ok(())
    }

    /// Handle a datum.
    fn datum(&mut self, _doc: Document) -> ExportResult<()> {
        Ok(())
    }

    /// Handle a datum page.
    fn datum_page(&mut self, _doc: Document) -> ExportResult<()> {
        Ok(())
    }

    /// Handle the run stop.
    fn stop(&mut self, _doc: Document) -> ExportResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: Vec<&'static str>,
    }

    impl DocumentRouter for Recorder {
        fn start(&mut self, _doc: Document) -> ExportResult<()> {
            self.seen.push("start");
            Ok(())
        }

        fn stop(&mut self, _doc: Document) -> ExportResult<()> {
            self.seen.push("stop");
            Ok(())
        }
    }

    #[test]
    fn test_unhandled_kinds_are_accepted_and_ignored() {
        let mut router = Recorder::default();
        router.route(DocumentKind::Start, Document::new()).unwrap();
        router.route(DocumentKind::Event, Document::new()).unwrap();
        router.route(DocumentKind::DatumPage, Document::new()).unwrap();
        router.route(DocumentKind::Stop, Document::new()).unwrap();

        assert_eq!(router.seen, vec!["start", "stop"]);
    }
}
