//! Command dispatcher mapping record tags to subscribers.
//!
//! Subscribers are held as `Weak` references: the dispatcher never keeps a
//! feature module alive. Each subscription returns a [`Registration`] guard
//! that unsubscribes when dropped, so a module's registrations end with it.
//!
//! # Example
//!
//! ```
//! use std::sync::{Arc, Weak};
//! use bytes::Bytes;
//! use atem_client::handler::{CommandDispatcher, RecordHandler};
//! use atem_client::protocol::{Record, Tag};
//!
//! struct Printer;
//!
//! impl RecordHandler for Printer {
//!     fn handle_record(&self, tag: Tag, body: &Bytes) -> atem_client::Result<()> {
//!         println!("{} {:?}", tag, body);
//!         Ok(())
//!     }
//! }
//!
//! let dispatcher = CommandDispatcher::new();
//! let printer: Arc<dyn RecordHandler> = Arc::new(Printer);
//! let _registration = dispatcher.subscribe(Tag::new(*b"PrgI"), Arc::downgrade(&printer));
//!
//! let record = Record::new(Tag::new(*b"PrgI"), Bytes::from_static(&[0, 0, 0, 1]));
//! assert_eq!(dispatcher.dispatch(&record).unwrap(), 1);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use bytes::Bytes;

use crate::error::{AtemError, Result};
use crate::protocol::{Record, Tag};

/// Capability implemented by anything that consumes decoded records.
pub trait RecordHandler: Send + Sync {
    /// Handle one record body for a tag this handler subscribed to.
    fn handle_record(&self, tag: Tag, body: &Bytes) -> Result<()>;
}

impl<F> RecordHandler for F
where
    F: Fn(Tag, &Bytes) -> Result<()> + Send + Sync,
{
    fn handle_record(&self, tag: Tag, body: &Bytes) -> Result<()> {
        self(tag, body)
    }
}

/// Identifier of one subscription.
pub type SubscriberId = u64;

struct Subscriber {
    id: SubscriberId,
    handler: Weak<dyn RecordHandler>,
}

#[derive(Default)]
struct Table {
    /// Subscribers by tag, in subscription order.
    by_tag: RwLock<HashMap<Tag, Vec<Subscriber>>>,
    /// Next subscriber ID to assign.
    next_id: AtomicU64,
}

impl Table {
    fn remove(&self, tag: Tag, id: SubscriberId) -> bool {
        let mut by_tag = self.by_tag.write().unwrap_or_else(PoisonError::into_inner);
        let Some(subscribers) = by_tag.get_mut(&tag) else {
            return false;
        };
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        let removed = subscribers.len() != before;
        if subscribers.is_empty() {
            by_tag.remove(&tag);
        }
        removed
    }
}

/// Registry mapping tags to record handlers.
///
/// Cheap to clone; clones share one subscription table.
#[derive(Clone, Default)]
pub struct CommandDispatcher {
    table: Arc<Table>,
}

impl CommandDispatcher {
    /// Create a new empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a handler to one tag.
    ///
    /// The handler is invoked until the returned guard is dropped or the
    /// handler itself is dropped, whichever comes first.
    #[must_use = "dropping the registration unsubscribes immediately"]
    pub fn subscribe(&self, tag: Tag, handler: Weak<dyn RecordHandler>) -> Registration {
        let id = self.table.next_id.fetch_add(1, Ordering::Relaxed);
        self.table
            .by_tag
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(tag)
            .or_default()
            .push(Subscriber { id, handler });

        tracing::trace!("Subscribed {} as #{}", tag, id);
        Registration {
            table: Arc::downgrade(&self.table),
            tag,
            id,
        }
    }

    /// Subscribe one handler to several tags.
    pub fn subscribe_all(
        &self,
        tags: &[Tag],
        handler: &Weak<dyn RecordHandler>,
    ) -> Vec<Registration> {
        tags.iter()
            .map(|&tag| self.subscribe(tag, handler.clone()))
            .collect()
    }

    /// Remove one subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, tag: Tag, id: SubscriberId) -> bool {
        self.table.remove(tag, id)
    }

    /// Number of live subscribers for a tag.
    pub fn subscriber_count(&self, tag: Tag) -> usize {
        self.table
            .by_tag
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&tag)
            .map(|subs| subs.iter().filter(|s| s.handler.strong_count() > 0).count())
            .unwrap_or(0)
    }

    /// Deliver a record to every subscriber of its tag.
    ///
    /// Returns the number of handlers invoked. A handler error is logged and
    /// does not stop delivery to the remaining subscribers. A tag without
    /// live subscribers yields `UnknownTag`.
    pub fn dispatch(&self, record: &Record) -> Result<usize> {
        // Snapshot under the lock so handlers may (un)subscribe freely.
        let handlers: Vec<Arc<dyn RecordHandler>> = {
            let by_tag = self.table.by_tag.read().unwrap_or_else(PoisonError::into_inner);
            by_tag
                .get(&record.tag)
                .map(|subs| subs.iter().filter_map(|s| s.handler.upgrade()).collect())
                .unwrap_or_default()
        };

        if handlers.is_empty() {
            return Err(AtemError::UnknownTag(record.tag));
        }

        for handler in &handlers {
            if let Err(e) = handler.handle_record(record.tag, &record.body) {
                tracing::warn!("Handler error for {}: {}", record.tag, e);
            }
        }

        Ok(handlers.len())
    }
}

/// Guard for one subscription; unsubscribes on drop.
pub struct Registration {
    table: Weak<Table>,
    tag: Tag,
    id: SubscriberId,
}

impl Registration {
    #[inline]
    pub fn tag(&self) -> Tag {
        self.tag
    }

    #[inline]
    pub fn id(&self) -> SubscriberId {
        self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(table) = self.table.upgrade() {
            table.remove(self.tag, self.id);
        }
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("tag", &self.tag)
            .field("id", &self.id)
            .finish()
    }
}
