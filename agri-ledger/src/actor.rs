//! Single-writer actor for the ledger
//!
//! Every mutating operation goes through one task that owns the write path:
//! - One logical writer serializes all transactions, so each operation sees
//!   the committed result of the one before it
//! - The bounded mailbox applies backpressure to submitters
//! - Events are published only after the write set is durable
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │               LedgerHandle (Clone)                    │
//! │         Sends Submit messages to actor mailbox        │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │              LedgerActor (Single Task)                │
//! │  ┌────────────────────────────────────────────────┐  │
//! │  │ stamp tx id + timestamp                        │  │
//! │  │ SupplyChainContract::invoke(TxContext)         │  │
//! │  └────────────────────────────────────────────────┘  │
//! │                       │                               │
//! │                       ▼                               │
//! │           StateStore::commit(write set)               │
//! │                       │                               │
//! │                       ▼                               │
//! │           EventBus::publish(event)                    │
//! └───────────────────────────────────────────────────────┘
//! ```

use crate::context::TxContext;
use crate::contract::{Invocation, SupplyChainContract};
use crate::events::{EmittedEvent, EventBus};
use crate::metrics::{Metrics, OUTCOME_COMMITTED};
use crate::records::Record;
use crate::storage::StateStore;
use crate::types::Caller;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Outcome of a committed transaction
#[derive(Debug, Clone, PartialEq)]
pub struct TxReceipt {
    /// Transaction id
    pub tx_id: String,
    /// Commit sequence number
    pub commit_seq: u64,
    /// Primary record the operation created or updated
    pub record: Record,
}

/// Message sent to the ledger actor
#[derive(Debug)]
pub enum LedgerMessage {
    /// Execute and commit one operation
    Submit {
        /// Verified invoker
        caller: Caller,
        /// Operation and arguments
        invocation: Invocation,
        /// Reply channel
        response: oneshot::Sender<Result<TxReceipt>>,
    },

    /// Shutdown actor
    Shutdown,
}

/// Actor that owns the write path
pub struct LedgerActor {
    /// World state
    store: Arc<dyn StateStore>,

    /// State machine
    contract: SupplyChainContract,

    /// Post-commit event fan-out
    events: EventBus,

    /// Metrics
    metrics: Metrics,

    /// Mailbox for incoming messages
    mailbox: mpsc::Receiver<LedgerMessage>,
}

impl std::fmt::Debug for LedgerActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerActor").field("contract", &self.contract).finish()
    }
}

impl LedgerActor {
    /// Create new actor
    pub fn new(
        store: Arc<dyn StateStore>,
        contract: SupplyChainContract,
        events: EventBus,
        metrics: Metrics,
        mailbox: mpsc::Receiver<LedgerMessage>,
    ) -> Self {
        Self {
            store,
            contract,
            events,
            metrics,
            mailbox,
        }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                LedgerMessage::Submit {
                    caller,
                    invocation,
                    response,
                } => {
                    let result = self.execute(caller, invocation);
                    if response.send(result).is_err() {
                        tracing::debug!("Submitter went away before the receipt was sent");
                    }
                }
                LedgerMessage::Shutdown => break,
            }
        }
        tracing::info!("Ledger actor stopped");
    }

    /// Execute one transaction end to end
    fn execute(&self, caller: Caller, invocation: Invocation) -> Result<TxReceipt> {
        let operation = invocation.operation();
        let started = Instant::now();
        let tx_id = Uuid::now_v7().to_string();
        let timestamp = Utc::now();

        let span = tracing::info_span!(
            "tx",
            tx_id = %tx_id,
            operation = %operation,
            msp_id = %caller.msp_id
        );
        let _enter = span.enter();

        let result = self.apply(caller, invocation, tx_id, timestamp);

        let outcome = match &result {
            Ok(receipt) => {
                tracing::info!(commit_seq = receipt.commit_seq, key = %receipt.record.key(), "Committed");
                OUTCOME_COMMITTED
            }
            Err(e) if e.is_business_rejection() => {
                tracing::warn!(error = %e, "Rejected");
                e.kind()
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed");
                e.kind()
            }
        };
        self.metrics
            .record_operation(operation.name(), outcome, started.elapsed().as_secs_f64());

        result
    }

    fn apply(
        &self,
        caller: Caller,
        invocation: Invocation,
        tx_id: String,
        timestamp: DateTime<Utc>,
    ) -> Result<TxReceipt> {
        let mut ctx = TxContext::new(self.store.as_ref(), caller, tx_id.clone(), timestamp);
        let record = self.contract.invoke(&mut ctx, invocation)?;

        let (batch, event) = ctx.into_commit();
        let commit_seq = self.store.commit(&batch)?;

        if let Some(event) = event {
            let name = event.name();
            let receivers = self.events.publish(EmittedEvent {
                tx_id: tx_id.clone(),
                commit_seq,
                event,
            });
            self.metrics.record_event_published(name);
            tracing::debug!(event = name, receivers, "Event published");
        }

        Ok(TxReceipt {
            tx_id,
            commit_seq,
            record,
        })
    }
}

/// Handle for sending messages to the actor
#[derive(Clone, Debug)]
pub struct LedgerHandle {
    sender: mpsc::Sender<LedgerMessage>,
}

impl LedgerHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<LedgerMessage>) -> Self {
        Self { sender }
    }

    /// Submit an operation and wait for its receipt
    pub async fn submit(&self, caller: Caller, invocation: Invocation) -> Result<TxReceipt> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(LedgerMessage::Submit {
                caller,
                invocation,
                response: tx,
            })
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(LedgerMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        Ok(())
    }
}

/// Spawn the ledger actor
pub fn spawn_ledger_actor(
    store: Arc<dyn StateStore>,
    contract: SupplyChainContract,
    events: EventBus,
    metrics: Metrics,
    mailbox_capacity: usize,
) -> LedgerHandle {
    let (tx, rx) = mpsc::channel(mailbox_capacity); // Bounded channel for backpressure
    let actor = LedgerActor::new(store, contract, events, metrics, rx);

    tokio::spawn(async move {
        actor.run().await;
    });

    LedgerHandle::new(tx)
}
