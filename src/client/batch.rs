//! Batches
//!
//! A batch groups puts and deletes that the device applies together or not
//! at all.
//!
//! ```text
//!   START_BATCH(id)           ──► ack
//!   PUT / DELETE (batch id)   ──► (no response)
//!   END_BATCH(id, count)      ──► ack: every operation applied
//!                                 INVALID_BATCH: nothing applied
//! ```
//!
//! Member operations are not acknowledged individually; their failures
//! surface through END_BATCH as [`KineticError::BatchAborted`].

use bytes::Bytes;

use crate::error::{KineticError, Result};
use crate::operations::{DeleteOptions, Operation, PutOptions};

use super::{Client, Strategy};

/// An open batch on a client connection
pub struct Batch<'a, S: Strategy> {
    client: &'a Client<S>,
    batch_id: u32,
    op_count: u32,
    completed: bool,
}

impl<'a, S: Strategy> Batch<'a, S> {
    pub(crate) fn new(client: &'a Client<S>, batch_id: u32) -> Self {
        tracing::debug!("Started batch {}", batch_id);
        Self {
            client,
            batch_id,
            op_count: 0,
            completed: false,
        }
    }

    pub fn batch_id(&self) -> u32 {
        self.batch_id
    }

    /// Operations added so far
    pub fn op_count(&self) -> u32 {
        self.op_count
    }

    /// Whether commit or abort has been called
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn put(&mut self, key: impl AsRef<[u8]>, value: impl Into<Bytes>) -> Result<()> {
        self.put_with(key, value, PutOptions::default())
    }

    pub fn put_with(
        &mut self,
        key: impl AsRef<[u8]>,
        value: impl Into<Bytes>,
        options: PutOptions,
    ) -> Result<()> {
        self.add(Operation::Put {
            key: key.as_ref().to_vec(),
            value: value.into(),
            options,
        })
    }

    pub fn delete(&mut self, key: impl AsRef<[u8]>) -> Result<()> {
        self.delete_with(key, DeleteOptions::default())
    }

    pub fn delete_with(&mut self, key: impl AsRef<[u8]>, options: DeleteOptions) -> Result<()> {
        self.add(Operation::Delete {
            key: key.as_ref().to_vec(),
            options,
        })
    }

    fn add(&mut self, op: Operation) -> Result<()> {
        if self.completed {
            return Err(KineticError::BatchCompleted);
        }
        let request = op.build()?.in_batch(self.batch_id);
        self.client.strategy()?.submit(request, None)?;
        self.op_count += 1;
        Ok(())
    }

    /// Apply every operation. Fails with `BatchAborted` when the device
    /// rejected one of them, in which case none were applied.
    pub fn commit(&mut self) -> Result<()> {
        if self.completed {
            return Err(KineticError::BatchCompleted);
        }
        self.completed = true;
        let op = Operation::EndBatch {
            batch_id: self.batch_id,
            count: self.op_count,
        };
        let result = self.client.execute(op).and_then(|outcome| outcome.into_done());
        match &result {
            Ok(()) => tracing::debug!("Committed batch {} ({} ops)", self.batch_id, self.op_count),
            Err(e) => tracing::warn!("Batch {} failed: {}", self.batch_id, e),
        }
        result
    }

    /// Discard every operation
    pub fn abort(&mut self) -> Result<()> {
        if self.completed {
            return Err(KineticError::BatchCompleted);
        }
        self.completed = true;
        let op = Operation::AbortBatch {
            batch_id: self.batch_id,
        };
        self.client.execute(op)?.into_done()
    }
}

impl<S: Strategy> Drop for Batch<'_, S> {
    fn drop(&mut self) {
        if !self.completed {
            tracing::warn!(
                "Batch {} dropped with {} uncommitted operations",
                self.batch_id,
                self.op_count
            );
        }
    }
}
