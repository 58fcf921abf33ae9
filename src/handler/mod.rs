//! Handler module - record dispatch.
//!
//! Provides:
//! - [`RecordHandler`] - capability implemented by record consumers
//! - [`CommandDispatcher`] - maps tags to handlers, fans records out
//! - [`Registration`] - scoped subscription, removed on drop
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use atem_client::handler::{CommandDispatcher, RecordHandler};
//! use atem_client::protocol::Tag;
//!
//! let dispatcher = CommandDispatcher::new();
//! let handler: Arc<dyn RecordHandler> =
//!     Arc::new(|tag: Tag, body: &Bytes| -> atem_client::Result<()> {
//!         println!("{}: {} bytes", tag, body.len());
//!         Ok(())
//!     });
//! let registration = dispatcher.subscribe(Tag::new(*b"PrgI"), Arc::downgrade(&handler));
//! assert_eq!(dispatcher.subscriber_count(registration.tag()), 1);
//! ```

mod registry;

pub use registry::{CommandDispatcher, RecordHandler, Registration, SubscriberId};
