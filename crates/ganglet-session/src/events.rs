//! Session event handlers

/// A scheduling event delivered to handlers
#[derive(Debug, Clone)]
pub struct Event {
    /// Pod the event concerns
    pub pod_uid: String,
    /// Node the pod was placed on, if any
    pub node_name: Option<String>,
}

/// Handler registration for session events
///
/// Deallocate handlers fire after the statement applies an eviction.
/// Handlers must not call back into the session.
#[derive(Default)]
pub struct EventHandler {
    /// Invoked when a task's resources are deallocated
    pub deallocate: Option<Box<dyn Fn(&Event) + Send + Sync>>,
}

impl EventHandler {
    /// Create a handler for deallocation events
    pub fn on_deallocate(f: impl Fn(&Event) + Send + Sync + 'static) -> Self {
        Self {
            deallocate: Some(Box::new(f)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_deallocate_handler_fires() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let handler = EventHandler::on_deallocate(move |_| {
            seen.fetch_add(1, Ordering::Relaxed);
        });

        let event = Event {
            pod_uid: "default/worker-0".to_string(),
            node_name: Some("node-a".to_string()),
        };
        if let Some(f) = &handler.deallocate {
            f(&event);
        }
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }
}
