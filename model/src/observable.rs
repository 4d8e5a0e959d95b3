//! Publish/subscribe primitives shared by every stateful component.
//!
//! [`Emitter`] maps an event to an ordered list of subscribers, each one
//! identified by the [`SubscriptionId`] handed out on registration.
//! [`AttributeStore`] combines a typed attribute record with an emitter that
//! fires `change:<key>` whenever an attribute is written.

use derive_more::Display;
use std::{
    cell::{
        Cell,
        RefCell,
    },
    collections::HashMap,
    fmt,
    hash::Hash,
    rc::Rc,
};

/// Registration token returned by [`Emitter::on`], required to unsubscribe.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display("#{_0}")]
pub struct SubscriptionId(u64);

/// Ordered subscriber lists keyed by event.
///
/// Dispatch works on a snapshot of the subscribers: handlers registered or
/// removed while an event is being dispatched only take effect for the next
/// dispatch. No borrow is held while a handler runs, so handlers may freely
/// call back into the emitter.
pub struct Emitter<E, H: ?Sized> {
    handlers: RefCell<HashMap<E, Vec<(SubscriptionId, Rc<H>)>>>,
    next_id: Cell<u64>,
}

impl<E, H: ?Sized> Default for Emitter<E, H> {
    fn default() -> Self {
        Self {
            handlers: RefCell::new(HashMap::new()),
            next_id: Cell::new(0),
        }
    }
}

impl<E, H: ?Sized> fmt::Debug for Emitter<E, H>
where
    E: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.handlers.borrow();
        f.debug_map()
            .entries(handlers.iter().map(|(event, list)| (event, list.len())))
            .finish()
    }
}

impl<E, H> Emitter<E, H>
where
    E: Eq + Hash + fmt::Display,
    H: ?Sized,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, event: E, handler: Rc<H>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        trace!(%event, %id, "subscribed");
        self.handlers.borrow_mut().entry(event).or_default().push((id, handler));
        id
    }

    /// Removes the subscription `id` from `event`.
    ///
    /// Returns `false` if it was not registered; that is not an error.
    pub fn off(&self, event: &E, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.borrow_mut();
        let Some(list) = handlers.get_mut(event) else {
            trace!(%event, %id, "unsubscribe from event without subscribers");
            return false;
        };
        let Some(index) = list.iter().position(|(registered, _)| *registered == id) else {
            trace!(%event, %id, "unsubscribe of unknown subscription");
            return false;
        };
        list.remove(index);
        if list.is_empty() {
            handlers.remove(event);
        }
        true
    }

    /// Invokes `dispatch` once for every subscriber of `event`, in
    /// registration order.
    pub fn emit(&self, event: &E, mut dispatch: impl FnMut(&H)) {
        let snapshot: Vec<Rc<H>> = match self.handlers.borrow().get(event) {
            Some(list) => list.iter().map(|(_, handler)| handler.clone()).collect(),
            None => return,
        };
        for handler in snapshot {
            dispatch(&handler);
        }
    }

    pub fn subscriber_count(&self, event: &E) -> usize {
        self.handlers.borrow().get(event).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.borrow().is_empty()
    }
}

/// Event published by an [`AttributeStore`].
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreEvent<K> {
    #[display("change:{_0}")]
    Change(K),
}

/// A typed attribute record addressable by key.
pub trait Attributes {
    type Key: Copy + Eq + Hash + fmt::Debug + fmt::Display;
    type Value: Clone + fmt::Debug;

    fn get(&self, key: Self::Key) -> Self::Value;

    /// Writes `value` into the attribute `key`. Returns `false`, leaving the
    /// record untouched, if the value does not fit the attribute.
    fn set(&mut self, key: Self::Key, value: Self::Value) -> bool;
}

/// Change handler: receives the owner of the store and the new value.
pub type ChangeHandler<O, V> = dyn Fn(&O, &V);

/// Attribute record with synchronous change notification.
pub struct AttributeStore<A: Attributes, O> {
    attributes: RefCell<A>,
    emitter: Emitter<StoreEvent<A::Key>, ChangeHandler<O, A::Value>>,
}

impl<A, O> fmt::Debug for AttributeStore<A, O>
where
    A: Attributes + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeStore")
            .field("attributes", &self.attributes.borrow())
            .field("subscribers", &self.emitter)
            .finish()
    }
}

impl<A: Attributes, O> AttributeStore<A, O> {
    pub fn new(attributes: A) -> Self {
        Self {
            attributes: RefCell::new(attributes),
            emitter: Emitter::default(),
        }
    }

    pub fn get(&self, key: A::Key) -> A::Value {
        self.attributes.borrow().get(key)
    }

    /// Reads from the typed record without cloning all of it.
    pub fn read<T>(&self, f: impl FnOnce(&A) -> T) -> T {
        f(&self.attributes.borrow())
    }

    /// Stores `value` and notifies every `change:<key>` subscriber with
    /// `owner` and the new value.
    pub fn set(&self, owner: &O, key: A::Key, value: A::Value) {
        let accepted = self.attributes.borrow_mut().set(key, value.clone());
        if !accepted {
            warn!(%key, ?value, "value does not fit attribute, ignoring it");
            return;
        }
        self.emitter
            .emit(&StoreEvent::Change(key), |handler| handler(owner, &value));
    }

    pub fn on<F>(&self, event: StoreEvent<A::Key>, handler: F) -> SubscriptionId
    where
        F: Fn(&O, &A::Value) + 'static,
    {
        self.emitter.on(event, Rc::new(handler))
    }

    pub fn off(&self, event: StoreEvent<A::Key>, id: SubscriptionId) -> bool {
        self.emitter.off(&event, id)
    }

    pub fn subscriber_count(&self, event: StoreEvent<A::Key>) -> usize {
        self.emitter.subscriber_count(&event)
    }
}
