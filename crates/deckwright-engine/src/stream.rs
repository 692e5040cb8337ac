use std::pin::Pin;
use std::task::{Context, Poll};

use deckwright_core::{CompositionEvent, DocumentId};
use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Merged event stream of one composition.
///
/// Ends after `CompositionComplete`. Dropping it cancels the composition.
pub struct CompositionStream {
    document_id: DocumentId,
    inner: ReceiverStream<CompositionEvent>,
    cancel: CancellationToken,
    _guard: DropGuard,
}

impl CompositionStream {
    pub(crate) fn new(
        document_id: DocumentId,
        rx: mpsc::Receiver<CompositionEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            document_id,
            inner: ReceiverStream::new(rx),
            _guard: cancel.clone().drop_guard(),
            cancel,
        }
    }

    pub fn document_id(&self) -> &DocumentId {
        &self.document_id
    }

    /// Cancel in-flight sections. The stream still ends with `CompositionComplete`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Stream for CompositionStream {
    type Item = CompositionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
