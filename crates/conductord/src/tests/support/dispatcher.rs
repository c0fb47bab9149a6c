//! Dispatcher double recording every posted message.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use conductor_protocol::{ClientIdentifier, Command, CommandResult, Label, Response, ResultStatus};

use crate::dispatch::{Dispatcher, HandlerKind, ReaderMessage};
use crate::reader::{ReplyChannel, WriterError};

/// Snapshot of one posted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedMessage {
    pub handler: HandlerKind,
    pub command: Command,
    pub client: ClientIdentifier,
    pub has_reply: bool,
}

/// Records posts and optionally answers each command with a fixed status.
#[derive(Default)]
pub struct RecordingDispatcher {
    answer: Option<ResultStatus>,
    posted: Mutex<Vec<PostedMessage>>,
    replies: Mutex<Vec<Arc<dyn ReplyChannel>>>,
    arrived: Condvar,
}

impl RecordingDispatcher {
    /// Records posts without answering them.
    #[must_use]
    pub fn silent() -> Self {
        Self::default()
    }

    /// Answers every command with `status` and label `(sequence, 1)`.
    #[must_use]
    pub fn answering(status: ResultStatus) -> Self {
        Self {
            answer: Some(status),
            ..Self::default()
        }
    }

    pub fn posted(&self) -> Vec<PostedMessage> {
        self.posted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Waits until at least `count` messages were posted or `timeout`
    /// elapses, returning what arrived.
    pub fn wait_for_posts(&self, count: usize, timeout: Duration) -> Vec<PostedMessage> {
        let posted = self.posted.lock().unwrap_or_else(PoisonError::into_inner);
        let (posted, _) = self
            .arrived
            .wait_timeout_while(posted, timeout, |messages| messages.len() < count)
            .unwrap_or_else(PoisonError::into_inner);
        posted.clone()
    }

    /// Pushes `response` through the reply channel of the latest command.
    pub fn push_response(&self, response: &Response) -> Result<(), WriterError> {
        let replies = self.replies.lock().unwrap_or_else(PoisonError::into_inner);
        let reply = replies.last().expect("a command with a reply channel was posted");
        reply.send_response(response)
    }
}

impl Dispatcher for RecordingDispatcher {
    fn post(&self, message: ReaderMessage) {
        if let Some(reply) = &message.reply {
            self.replies
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(Arc::clone(reply));
        }
        {
            let mut posted = self.posted.lock().unwrap_or_else(PoisonError::into_inner);
            posted.push(PostedMessage {
                handler: message.handler,
                command: message.command.clone(),
                client: message.client,
                has_reply: message.reply.is_some(),
            });
            self.arrived.notify_all();
        }
        if let Some(status) = self.answer
            && !message.is_disconnect()
        {
            let sequence = message.command.sequence;
            message.reply_result(
                CommandResult::new(status, sequence).with_label(Label::new(sequence, 1)),
            );
        }
    }
}
