//! Lifecycle event dispatch

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Points in an entity's lifecycle listeners can hook into
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecycleEvent {
    PrePersist,
    PostPersist,
    PreRemove,
    PostRemove,
    PreFlush,
    PostFlush,
    PostLoad,
    OnClear,
}

impl std::fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PrePersist => write!(f, "prePersist"),
            Self::PostPersist => write!(f, "postPersist"),
            Self::PreRemove => write!(f, "preRemove"),
            Self::PostRemove => write!(f, "postRemove"),
            Self::PreFlush => write!(f, "preFlush"),
            Self::PostFlush => write!(f, "postFlush"),
            Self::PostLoad => write!(f, "postLoad"),
            Self::OnClear => write!(f, "onClear"),
        }
    }
}

/// What an event is about. Flush and clear events carry no entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventArgs {
    pub entity: Option<String>,
    pub id: Option<i64>,
}

impl EventArgs {
    pub fn for_entity(entity: &str, id: Option<i64>) -> Self {
        Self {
            entity: Some(entity.to_string()),
            id,
        }
    }

    pub fn empty() -> Self {
        Self {
            entity: None,
            id: None,
        }
    }
}

pub trait EventListener: Send + Sync {
    fn on_event(&self, event: LifecycleEvent, args: &EventArgs);
}

impl<F> EventListener for F
where
    F: Fn(LifecycleEvent, &EventArgs) + Send + Sync,
{
    fn on_event(&self, event: LifecycleEvent, args: &EventArgs) {
        self(event, args)
    }
}

/// A listener that names the events it wants
pub trait EventSubscriber: EventListener {
    fn subscribed_events(&self) -> Vec<LifecycleEvent>;
}

type Listeners = BTreeMap<LifecycleEvent, Vec<Arc<dyn EventListener>>>;

/// Event dispatcher. Clones share one listener table.
#[derive(Clone, Default)]
pub struct EventManager {
    listeners: Arc<RwLock<Listeners>>,
}

impl std::fmt::Debug for EventManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
        let counts: BTreeMap<_, _> = listeners.iter().map(|(e, l)| (*e, l.len())).collect();
        f.debug_struct("EventManager").field("listeners", &counts).finish()
    }
}

impl EventManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_event_listener(&self, events: &[LifecycleEvent], listener: Arc<dyn EventListener>) {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        for event in events {
            listeners.entry(*event).or_default().push(Arc::clone(&listener));
        }
    }

    pub fn add_event_subscriber<S>(&self, subscriber: Arc<S>)
    where
        S: EventSubscriber + 'static,
    {
        let events = subscriber.subscribed_events();
        self.add_event_listener(&events, subscriber);
    }

    /// Remove `listener` from `events`, matching by identity
    pub fn remove_event_listener(&self, events: &[LifecycleEvent], listener: &Arc<dyn EventListener>) {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        for event in events {
            if let Some(registered) = listeners.get_mut(event) {
                registered.retain(|l| !Arc::ptr_eq(l, listener));
            }
        }
    }

    pub fn has_listeners(&self, event: LifecycleEvent) -> bool {
        let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
        listeners.get(&event).is_some_and(|l| !l.is_empty())
    }

    pub fn dispatch(&self, event: LifecycleEvent, args: &EventArgs) {
        // Snapshot first so listeners may register further listeners
        let targets = {
            let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
            listeners.get(&event).cloned().unwrap_or_default()
        };
        for listener in targets {
            listener.on_event(event, args);
        }
    }

    /// Whether both handles dispatch to the same listeners
    pub fn shares_with(&self, other: &EventManager) -> bool {
        Arc::ptr_eq(&self.listeners, &other.listeners)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(LifecycleEvent, Option<i64>)>>,
    }

    impl EventListener for Recorder {
        fn on_event(&self, event: LifecycleEvent, args: &EventArgs) {
            self.seen.lock().unwrap().push((event, args.id));
        }
    }

    impl EventSubscriber for Recorder {
        fn subscribed_events(&self) -> Vec<LifecycleEvent> {
            vec![LifecycleEvent::PostPersist, LifecycleEvent::PostFlush]
        }
    }

    #[test]
    fn test_listener_receives_only_its_events() {
        let events = EventManager::new();
        let recorder = Arc::new(Recorder::default());
        events.add_event_listener(&[LifecycleEvent::PrePersist], recorder.clone());

        events.dispatch(LifecycleEvent::PrePersist, &EventArgs::for_entity("Note", None));
        events.dispatch(LifecycleEvent::PostPersist, &EventArgs::for_entity("Note", Some(1)));

        assert_eq!(
            *recorder.seen.lock().unwrap(),
            vec![(LifecycleEvent::PrePersist, None)]
        );
    }

    #[test]
    fn test_subscriber_and_shared_clones() {
        let events = EventManager::new();
        let clone = events.clone();
        let recorder = Arc::new(Recorder::default());
        clone.add_event_subscriber(recorder.clone());

        assert!(events.shares_with(&clone));
        assert!(events.has_listeners(LifecycleEvent::PostFlush));
        assert!(!events.has_listeners(LifecycleEvent::PreFlush));

        events.dispatch(LifecycleEvent::PostFlush, &EventArgs::empty());
        assert_eq!(recorder.seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_closure_listener_and_removal() {
        let events = EventManager::new();
        let hits = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&hits);
        let listener: Arc<dyn EventListener> =
            Arc::new(move |_: LifecycleEvent, _: &EventArgs| *counter.lock().unwrap() += 1);

        events.add_event_listener(&[LifecycleEvent::OnClear], listener.clone());
        events.dispatch(LifecycleEvent::OnClear, &EventArgs::empty());
        events.remove_event_listener(&[LifecycleEvent::OnClear], &listener);
        events.dispatch(LifecycleEvent::OnClear, &EventArgs::empty());

        assert_eq!(*hits.lock().unwrap(), 1);
        assert!(!events.has_listeners(LifecycleEvent::OnClear));
    }
}
