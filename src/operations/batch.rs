//! Batch control operations
//!
//! Every command inside a batch carries the batch id in its header. Puts and
//! deletes are sent without expecting an individual response; END_BATCH
//! carries the number of operations the device should have seen.

use crate::protocol::{BatchInfo, Body, Command, MessageType};

pub(crate) fn start(batch_id: u32) -> Command {
    let mut command = Command::new(MessageType::StartBatch, Body::Empty);
    command.header.batch_id = Some(batch_id);
    command
}

pub(crate) fn end(batch_id: u32, count: u32) -> Command {
    let body = BatchInfo {
        count,
        failed_sequence: None,
    };
    let mut command = Command::new(MessageType::EndBatch, Body::Batch(body));
    command.header.batch_id = Some(batch_id);
    command
}

pub(crate) fn abort(batch_id: u32) -> Command {
    let mut command = Command::new(MessageType::AbortBatch, Body::Empty);
    command.header.batch_id = Some(batch_id);
    command
}
