use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tracing::debug;

use pcx_event::{EventFilter, EventManager, EventSubject, EventTopic, GraphEvent, SubscriptionId};
use pcx_types::ChannelId;

use crate::context::Context;

/// Subscription that feeds an upstream channel's events into a context.
///
/// Events posted by the context itself are skipped. Releasing the bridge
/// unsubscribes it; later events are dropped even if one is already being
/// delivered.
pub struct PeerEventBridge {
    context: ChannelId,
    upstream: ChannelId,
    manager: Arc<EventManager>,
    subscription: SubscriptionId,
    active: Arc<AtomicBool>,
}

impl PeerEventBridge {
    pub(crate) fn attach(
        target: Weak<Context>,
        context: ChannelId,
        upstream: ChannelId,
        manager: Arc<EventManager>,
    ) -> Self {
        let active = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&active);
        let filter = EventFilter::for_subject(EventSubject::Channel(upstream)).with_topics([
            EventTopic::Committed,
            EventTopic::RolledBack,
            EventTopic::Changed,
        ]);

        let subscription = manager.subscribe(
            filter,
            Arc::new(move |event: &GraphEvent| {
                if !flag.load(Ordering::Acquire) || event.posted_by == context {
                    return;
                }
                if let Some(target) = target.upgrade() {
                    target.enqueue_peer_event(event.clone());
                }
            }),
        );
        debug!(%context, %upstream, "peer bridge attached");

        Self {
            context,
            upstream,
            manager,
            subscription,
            active,
        }
    }

    pub fn upstream(&self) -> ChannelId {
        self.upstream
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stop delivering events. Idempotent.
    pub fn release(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            self.manager.unsubscribe(self.subscription);
            debug!(context = %self.context, upstream = %self.upstream, "peer bridge released");
        }
    }
}

impl Drop for PeerEventBridge {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for PeerEventBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerEventBridge")
            .field("context", &self.context)
            .field("upstream", &self.upstream)
            .field("active", &self.is_active())
            .finish()
    }
}
