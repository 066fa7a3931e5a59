//! Compression lifecycle events.
//!
//! [`CompressionEngine`](crate::context::engine::CompressionEngine) emits a
//! [`CompressionEvent`] at each interesting point of a pass. Callers observe
//! them by implementing [`EventHandler`]:
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Default; ignores everything |
//! | [`LoggingHandler`] | Forwards events to `tracing` |
//! | [`FnEventHandler`] | Quick closures for simple callbacks |
//! | [`CompositeEventHandler`] | Compose multiple handlers in order |

use tracing::{debug, info, warn};

use crate::context::classifier::Importance;

// ── Events ─────────────────────────────────────────────────────────

/// Events emitted during a compression pass.
#[derive(Debug, Clone, PartialEq)]
pub enum CompressionEvent<'a> {
    /// A pass is starting because the transcript is over target.
    Started {
        original_tokens: usize,
        target_tokens: usize,
        turns: usize,
    },
    /// A rewrite strategy changed the working set.
    StrategyApplied {
        name: &'a str,
        /// Turns removed, rewritten or merged.
        affected: usize,
    },
    /// A chunk was written to the archive store.
    ChunkArchived {
        id: &'a str,
        turns: usize,
        importance: Importance,
    },
    /// An archive write, fact update or save failed. The pass continues.
    ArchiveFailed { error: &'a str },
    /// The pass finished.
    Finished {
        original_tokens: usize,
        compressed_tokens: usize,
        archived_chunks: usize,
        discarded: usize,
    },
}

// ── Handlers ───────────────────────────────────────────────────────

/// Observer for [`CompressionEvent`]s.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &CompressionEvent<'_>) {
        let _ = event;
    }
}

/// Ignores every event.
pub struct NoopHandler;

impl EventHandler for NoopHandler {}

/// Logs events through `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &CompressionEvent<'_>) {
        match event {
            CompressionEvent::Started {
                original_tokens,
                target_tokens,
                turns,
            } => {
                info!(
                    "Compressing {turns} turns: ~{original_tokens} tokens over target {target_tokens}"
                );
            }
            CompressionEvent::StrategyApplied { name, affected } => {
                debug!("Strategy {name} affected {affected} turn(s)");
            }
            CompressionEvent::ChunkArchived {
                id,
                turns,
                importance,
            } => {
                debug!("Archived chunk {id} ({turns} turns, {importance})");
            }
            CompressionEvent::ArchiveFailed { error } => {
                warn!("Archive failure: {error}");
            }
            CompressionEvent::Finished {
                original_tokens,
                compressed_tokens,
                archived_chunks,
                discarded,
            } => {
                info!(
                    "Compressed {original_tokens}→{compressed_tokens} tokens, \
                     archived {archived_chunks} chunk(s), discarded {discarded} turn(s)"
                );
            }
        }
    }
}

/// Wraps a closure as an [`EventHandler`].
///
/// ```
/// use cinch_memory::events::{CompressionEvent, EventHandler, FnEventHandler};
///
/// let handler = FnEventHandler::new(|event| {
///     if let CompressionEvent::ArchiveFailed { error } = event {
///         eprintln!("archive: {error}");
///     }
/// });
/// handler.on_event(&CompressionEvent::ArchiveFailed { error: "disk full" });
/// ```
pub struct FnEventHandler<F>(F)
where
    F: Fn(&CompressionEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&CompressionEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&CompressionEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &CompressionEvent<'_>) {
        (self.0)(event)
    }
}

/// Dispatches each event to every handler, in order.
#[derive(Default)]
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &CompressionEvent<'_>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn composite_dispatches_to_all() {
        let count = Arc::new(AtomicUsize::new(0));
        let (a, b) = (count.clone(), count.clone());
        let handler = CompositeEventHandler::new()
            .with(NoopHandler)
            .with(FnEventHandler::new(move |_| {
                a.fetch_add(1, Ordering::SeqCst);
            }))
            .with(FnEventHandler::new(move |_| {
                b.fetch_add(10, Ordering::SeqCst);
            }));
        handler.on_event(&CompressionEvent::StrategyApplied {
            name: "merge_tool_results",
            affected: 2,
        });
        assert_eq!(count.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn logging_handler_accepts_every_variant() {
        let events = [
            CompressionEvent::Started {
                original_tokens: 10,
                target_tokens: 5,
                turns: 3,
            },
            CompressionEvent::ChunkArchived {
                id: "ar-000001",
                turns: 2,
                importance: Importance::High,
            },
            CompressionEvent::ArchiveFailed { error: "offline" },
            CompressionEvent::Finished {
                original_tokens: 10,
                compressed_tokens: 4,
                archived_chunks: 1,
                discarded: 0,
            },
        ];
        for event in &events {
            LoggingHandler.on_event(event);
        }
    }
}
