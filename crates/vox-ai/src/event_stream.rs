use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::types::AssistantMessageEvent;

struct StreamInner {
    queue: Mutex<VecDeque<AssistantMessageEvent>>,
    closed: AtomicBool,
    notify: Notify,
}

/// Shared queue of assistant events. Providers `push` as tokens arrive; the
/// agent loop drains it with `next`. The stream closes on the first terminal
/// event (`Done`/`Error`) or on an explicit `close`.
///
/// A stream that is never closed keeps `next` pending, which is how a hung
/// provider looks to the consumer; callers race `next` against cancellation.
#[derive(Clone)]
pub struct AssistantMessageEventStream {
    inner: Arc<StreamInner>,
}

impl AssistantMessageEventStream {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StreamInner {
                queue: Mutex::new(VecDeque::new()),
                closed: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Stream pre-filled with `events`, closed afterwards. Handy for
    /// scripted providers.
    pub fn from_events(events: impl IntoIterator<Item = AssistantMessageEvent>) -> Self {
        let stream = Self::new();
        for event in events {
            stream.push(event);
        }
        stream.close();
        stream
    }

    pub fn push(&self, event: AssistantMessageEvent) {
        if self.is_closed() {
            return;
        }
        let terminal = matches!(
            event,
            AssistantMessageEvent::Done { .. } | AssistantMessageEvent::Error { .. }
        );
        self.lock_queue().push_back(event);
        if terminal {
            self.inner.closed.store(true, Ordering::SeqCst);
        }
        self.inner.notify.notify_one();
    }

    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Next buffered event; `None` once the stream is closed and drained.
    pub async fn next(&self) -> Option<AssistantMessageEvent> {
        loop {
            let notified = self.inner.notify.notified();
            if let Some(event) = self.lock_queue().pop_front() {
                return Some(event);
            }
            if self.is_closed() {
                return None;
            }
            notified.await;
        }
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<AssistantMessageEvent>> {
        self.inner
            .queue
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

impl Default for AssistantMessageEventStream {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::types::AssistantMessage;

    fn partial(text: &str) -> AssistantMessage {
        let mut message = AssistantMessage::empty("test", "test-model");
        message.content = vec![crate::AssistantContentBlock::Text {
            text: text.to_string(),
        }];
        message
    }

    #[tokio::test]
    async fn drains_buffered_events_then_ends_after_done() {
        let stream = AssistantMessageEventStream::new();
        stream.push(AssistantMessageEvent::Start {
            partial: partial(""),
        });
        stream.push(AssistantMessageEvent::Done {
            message: partial("hi"),
        });
        stream.push(AssistantMessageEvent::TextDelta {
            delta: "late".to_string(),
            partial: partial("late"),
        });

        assert!(matches!(
            stream.next().await,
            Some(AssistantMessageEvent::Start { .. })
        ));
        assert!(matches!(
            stream.next().await,
            Some(AssistantMessageEvent::Done { .. })
        ));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn next_wakes_when_producer_pushes_from_another_task() {
        let stream = AssistantMessageEventStream::new();
        let producer = stream.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            producer.push(AssistantMessageEvent::TextDelta {
                delta: "He".to_string(),
                partial: partial("He"),
            });
        });

        let event = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("event should arrive");
        assert!(matches!(
            event,
            Some(AssistantMessageEvent::TextDelta { delta, .. }) if delta == "He"
        ));
    }

    #[tokio::test]
    async fn open_stream_stays_pending() {
        let stream = AssistantMessageEventStream::new();
        let waited = tokio::time::timeout(Duration::from_millis(20), stream.next()).await;
        assert!(waited.is_err());
    }
}
