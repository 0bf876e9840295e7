//! Message Sink Port (Driven Port)
//!
//! Where a session puts the messages it produces. The socket driver drains
//! an in-memory outbox after every event, so sends never block the session.

use crate::domain::protocol::ServerMessage;

/// Outbound message queue for one session.
pub trait MessageSink {
    /// Queue a message for the client.
    fn send(&mut self, message: ServerMessage);
}

impl MessageSink for Vec<ServerMessage> {
    fn send(&mut self, message: ServerMessage) {
        self.push(message);
    }
}
