//! Reply channel and response listener doubles.

use std::sync::{Mutex, PoisonError};

use conductor_protocol::rpc::ResponseListener;
use conductor_protocol::{CommandResult, Label, Response, ResultStatus};

use crate::reader::{ReplyChannel, WriterError};

/// Fields of a delivered result that tests compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedResult {
    pub status: ResultStatus,
    pub sequence: u32,
    pub label: Label,
}

/// Reply channel that records everything sent through it.
#[derive(Debug, Default)]
pub struct RecordingReply {
    results: Mutex<Vec<RecordedResult>>,
    responses: Mutex<Vec<Response>>,
}

impl RecordingReply {
    pub fn results(&self) -> Vec<RecordedResult> {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn responses(&self) -> Vec<Response> {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ReplyChannel for RecordingReply {
    fn send_result(&self, result: CommandResult) -> Result<(), WriterError> {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedResult {
                status: result.status,
                sequence: result.sequence,
                label: result.label,
            });
        Ok(())
    }

    fn send_response(&self, response: &Response) -> Result<(), WriterError> {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(response.clone());
        Ok(())
    }
}

/// Response listener that records pushed responses.
#[derive(Debug, Default)]
pub struct RecordingListener {
    responses: Mutex<Vec<Response>>,
}

impl RecordingListener {
    pub fn responses(&self) -> Vec<Response> {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ResponseListener for RecordingListener {
    fn on_response(&self, response: Response) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(response);
    }
}
