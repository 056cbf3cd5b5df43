// EDB - Ethereum Debugger
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Session notifications.
//!
//! All notifications travel through one broadcast channel, so every subscriber
//! observes them in publication order. Publication happens while the session holds
//! its state lock, which makes that order the order of state changes.

use std::collections::HashSet;

use rdb_common::types::ResolvedLocation;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};
use tracing::{trace, warn};

/// A notification emitted by a debug session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEvent {
    /// A trace became available (`true`) or went away (`false`)
    StatusChanged {
        /// Whether a trace is loaded
        active: bool,
    },
    /// The cursor moved
    CursorChanged {
        /// New cursor position
        step: usize,
    },
    /// The source location of the current step is known
    LocationResolved(ResolvedLocation),
    /// Continuing stopped at a breakpoint hit; a cursor change follows
    BreakpointReached {
        /// Step of the hit
        step: usize,
    },
    /// The trace was unloaded
    Unloaded,
}

/// Discriminant of [`SessionEvent`], for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// [`SessionEvent::StatusChanged`]
    StatusChanged,
    /// [`SessionEvent::CursorChanged`]
    CursorChanged,
    /// [`SessionEvent::LocationResolved`]
    LocationResolved,
    /// [`SessionEvent::BreakpointReached`]
    BreakpointReached,
    /// [`SessionEvent::Unloaded`]
    Unloaded,
}

impl SessionEvent {
    /// Kind of this event
    pub fn kind(&self) -> EventKind {
        match self {
            Self::StatusChanged { .. } => EventKind::StatusChanged,
            Self::CursorChanged { .. } => EventKind::CursorChanged,
            Self::LocationResolved(_) => EventKind::LocationResolved,
            Self::BreakpointReached { .. } => EventKind::BreakpointReached,
            Self::Unloaded => EventKind::Unloaded,
        }
    }
}

/// Publisher side of the session notifications
#[derive(Debug, Clone)]
pub struct SessionEventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl SessionEventBus {
    /// Create a bus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        // broadcast channels cannot have zero capacity
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event to all current subscribers. Never blocks.
    pub fn publish(&self, event: SessionEvent) {
        trace!(?event, "Publishing session event");
        // Without subscribers there is nobody to tell
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events
    pub fn subscribe(&self) -> EventSubscriber {
        EventSubscriber { receiver: self.sender.subscribe(), kinds: None }
    }

    /// Subscribe to events of the given kinds only
    pub fn subscribe_to(&self, kinds: impl IntoIterator<Item = EventKind>) -> EventSubscriber {
        EventSubscriber {
            receiver: self.sender.subscribe(),
            kinds: Some(kinds.into_iter().collect()),
        }
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Receiving side of the session notifications
#[derive(Debug)]
pub struct EventSubscriber {
    receiver: broadcast::Receiver<SessionEvent>,
    kinds: Option<HashSet<EventKind>>,
}

impl EventSubscriber {
    fn accepts(&self, event: &SessionEvent) -> bool {
        self.kinds.as_ref().is_none_or(|kinds| kinds.contains(&event.kind()))
    }

    /// Wait for the next event. Returns `None` once the session is gone.
    ///
    /// A subscriber that falls more than the channel capacity behind loses the
    /// oldest events; the loss is logged and receiving continues.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.accepts(&event) => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "Session event subscriber lagged behind");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next already published event, without waiting
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.accepts(&event) => return Some(event),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(missed)) => {
                    warn!(missed, "Session event subscriber lagged behind");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// All already published events
    pub fn drain(&mut self) -> Vec<SessionEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}
