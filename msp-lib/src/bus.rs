use crate::frame::Frame;
use tokio::sync::mpsc;

/// Identifies one listener on a [`NotificationBus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Box<dyn FnMut(&Frame) + Send>;

/// Delivers every decoded frame, valid or not, to listeners in subscription order.
#[derive(Default)]
pub struct NotificationBus {
    listeners: Vec<(SubscriptionId, Listener)>,
    next_id: u64,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, listener: F) -> SubscriptionId
    where
        F: FnMut(&Frame) + Send + 'static,
    {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Forward frames into an unbounded channel. The subscription stays
    /// registered until removed, sends after the receiver is gone are ignored.
    pub fn subscribe_channel(&mut self) -> (SubscriptionId, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(move |frame| {
            let _ = tx.send(frame.clone());
        });
        (id, rx)
    }

    /// Returns false when `id` was not subscribed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(sid, _)| *sid != id);
        self.listeners.len() != before
    }

    pub fn clear(&mut self) {
        self.listeners.clear();
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn publish(&mut self, frame: &Frame) {
        for (_, listener) in self.listeners.iter_mut() {
            listener(frame);
        }
    }
}

impl std::fmt::Debug for NotificationBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationBus")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
