use lares::action::{ActionCommand, Rejection};
use lares::channel::ChannelState;
use lares::error::{Error, ErrorKind};
use lares::gateway::Publisher;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};

/// Default capacity of the update queue.
pub const QUEUE_CAPACITY: usize = 64;

/// A [`Publisher`] forwarding channel updates to a transport task.
///
/// The runtime never waits on the transport: when the queue is full the
/// update is refused and the channel stays pending until a later tick.
#[derive(Debug, Clone)]
pub struct QueueGateway {
    sender: mpsc::Sender<ChannelState>,
}

impl QueueGateway {
    /// Creates a [`QueueGateway`] with a queue of [`QUEUE_CAPACITY`]
    /// updates, returning the receiving side for the transport task.
    #[must_use]
    #[inline]
    pub fn new() -> (Self, mpsc::Receiver<ChannelState>) {
        Self::with_capacity(QUEUE_CAPACITY)
    }

    /// Creates a [`QueueGateway`] with a queue of `capacity` updates.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<ChannelState>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }
}

impl Publisher for QueueGateway {
    fn publish(&mut self, update: &ChannelState) -> Result<(), Error> {
        self.sender.try_send(*update).map_err(|e| match e {
            TrySendError::Full(_) => Error::new(ErrorKind::Publish, "update queue full"),
            TrySendError::Closed(_) => Error::new(ErrorKind::Publish, "transport stopped"),
        })
    }
}

/// A command received by the transport, with an optional reply channel
/// for the outcome.
#[derive(Debug)]
pub struct ActionRequest {
    /// The command.
    pub command: ActionCommand,
    reply: Option<oneshot::Sender<Result<(), Rejection>>>,
}

impl ActionRequest {
    /// Creates an [`ActionRequest`] whose outcome is not reported.
    #[must_use]
    #[inline]
    pub const fn new(command: ActionCommand) -> Self {
        Self {
            command,
            reply: None,
        }
    }

    /// Creates an [`ActionRequest`] and the receiver of its outcome.
    #[must_use]
    pub fn with_reply(command: ActionCommand) -> (Self, oneshot::Receiver<Result<(), Rejection>>) {
        let (sender, receiver) = oneshot::channel();
        (
            Self {
                command,
                reply: Some(sender),
            },
            receiver,
        )
    }

    pub(crate) fn respond(self, outcome: Result<(), Rejection>) {
        if let Some(reply) = self.reply {
            // The requester may have stopped waiting.
            let _ = reply.send(outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use lares::action::{Action, ActionCommand, Rejection};
    use lares::channel::{ChannelFlags, ChannelState, ChannelType, ChannelValue};
    use lares::error::ErrorKind;
    use lares::gateway::Publisher;

    use super::{ActionRequest, QueueGateway};

    fn update(number: u8) -> ChannelState {
        ChannelState {
            number,
            kind: ChannelType::Relay,
            value: ChannelValue::Bool(true),
            flags: ChannelFlags::empty(),
        }
    }

    #[test]
    fn test_full_queue_refuses_updates() {
        let (mut gateway, mut receiver) = QueueGateway::with_capacity(2);

        gateway.publish(&update(0)).unwrap();
        gateway.publish(&update(1)).unwrap();
        let error = gateway.publish(&update(2)).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Publish);

        assert_eq!(receiver.try_recv().unwrap(), update(0));
        gateway.publish(&update(2)).unwrap();
        assert_eq!(receiver.try_recv().unwrap(), update(1));
        assert_eq!(receiver.try_recv().unwrap(), update(2));
    }

    #[test]
    fn test_closed_queue() {
        let (mut gateway, receiver) = QueueGateway::new();
        drop(receiver);

        let error = gateway.publish(&update(0)).unwrap_err();
        assert_eq!(error.info(), "transport stopped");
    }

    #[test]
    fn test_action_reply() {
        let command = ActionCommand::new(3, Action::Toggle);

        let (request, mut outcome) = ActionRequest::with_reply(command);
        assert_eq!(request.command, command);
        request.respond(Err(Rejection::Blocked));
        assert_eq!(outcome.try_recv().unwrap(), Err(Rejection::Blocked));

        // Nobody listening.
        ActionRequest::new(command).respond(Ok(()));
    }
}
