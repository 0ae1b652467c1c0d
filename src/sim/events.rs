//! System events.
//!
//! Peripherals (and the host) communicate through events:
//! a timer output compare is an [`EventKind::Oc1`] event, which the parallel I/O
//! subscribes to in order to drive port A. Some events are meta-events
//! describing the simulator itself (e.g., [`EventKind::SimStart`]).
//!
//! Posted events go into an [`EventQueue`] and are delivered in FIFO order
//! to every subscriber of their kind, in subscription order.
//! The simulator drains the queue after every filter handler,
//! after every peripheral update, and after every host notification.

use std::collections::VecDeque;

macro_rules! event_kinds {
    ($($(#[$m:meta])* $name:ident),+ $(,)?) => {
        /// The kind of a system event.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum EventKind {
            $($(#[$m])* $name),+
        }
        impl EventKind {
            /// Every event kind.
            pub const ALL: &'static [EventKind] = &[$(Self::$name),+];
            const COUNT: usize = Self::ALL.len();

            fn index(self) -> usize {
                self as usize
            }
        }
    }
}
event_kinds! {
    /// Output compare 1 matched (or was forced through CFORC).
    Oc1,
    /// Output compare 2.
    Oc2,
    /// Output compare 3.
    Oc3,
    /// Output compare 4.
    Oc4,
    /// Output compare 5.
    Oc5,
    /// An edge was detected on input capture 1.
    Ic1,
    /// Input capture 2.
    Ic2,
    /// Input capture 3.
    Ic3,
    /// Input capture 4.
    Ic4,
    /// The free-running counter overflowed.
    Tov,
    /// The real-time interrupt period elapsed.
    Rti,
    /// A pulse accumulator input edge.
    Pai,
    /// The pulse accumulator overflowed.
    Paov,
    /// A run is starting.
    SimStart,
    /// A run has ended.
    SimEnd,
    /// The cycle counter was reset to 0.
    CycReset,
    /// A program is blocked waiting for a character.
    CharWait,
    /// A program is no longer waiting for a character.
    NoCharWait,
}
impl EventKind {
    /// The output compare event for channel `n` (1-5).
    pub fn oc(n: u8) -> Option<Self> {
        [Self::Oc1, Self::Oc2, Self::Oc3, Self::Oc4, Self::Oc5].get(usize::from(n).checked_sub(1)?).copied()
    }
}

/// An event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Event {
    /// The kind of event.
    pub kind: EventKind,
    /// The exact simulator cycle the event occurred on, if it is known
    /// to differ from the current cycle count.
    ///
    /// Output compares carry the cycle reconstructed from within the instruction;
    /// input captures carry the time of the edge.
    pub at: Option<u64>,
}

/// A callback the host registered for an event kind.
pub type HostSubscriber = Box<dyn FnMut(&Event) + Send>;

pub(crate) enum Subscriber {
    /// An installed peripheral, by index.
    Peripheral(usize),
    Host(HostSubscriber),
}
impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Peripheral(ix) => f.debug_tuple("Peripheral").field(ix).finish(),
            Self::Host(_) => f.debug_struct("Host").finish_non_exhaustive(),
        }
    }
}

/// The subscribers of each event kind.
#[derive(Debug, Default)]
pub(crate) struct Subscriptions {
    table: [Vec<Subscriber>; EventKind::COUNT],
}
impl Subscriptions {
    pub(crate) fn add(&mut self, kind: EventKind, sub: Subscriber) {
        self.table[kind.index()].push(sub);
    }
    pub(crate) fn of_mut(&mut self, kind: EventKind) -> &mut [Subscriber] {
        &mut self.table[kind.index()]
    }
}

/// Events that have been posted, but not yet delivered.
#[derive(Debug, Default)]
pub struct EventQueue {
    queue: VecDeque<Event>,
}
impl EventQueue {
    /// Posts an event.
    pub fn post(&mut self, kind: EventKind, at: Option<u64>) {
        self.queue.push_back(Event { kind, at });
    }
    pub(crate) fn pop(&mut self) -> Option<Event> {
        self.queue.pop_front()
    }
    /// Whether no event is waiting for delivery.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// The subscriber table and pending event queue of a simulator.
#[derive(Debug, Default)]
pub struct EventBus {
    pub(crate) subs: Subscriptions,
    pub(crate) queue: EventQueue,
}
impl EventBus {
    /// Creates an event bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes a host callback to an event kind.
    ///
    /// Host callbacks are called after any subscribers registered before them.
    pub fn subscribe(&mut self, kind: EventKind, f: impl FnMut(&Event) + Send + 'static) {
        self.subs.add(kind, Subscriber::Host(Box::new(f)));
    }
}
