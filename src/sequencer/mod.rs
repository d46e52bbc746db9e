//! The command loop: MPSC intake and the single matching thread.
//!
//! All book and position mutation happens on one worker thread that drains
//! the command queue in FIFO order, which is the global serialization
//! order. Synchronous callers attach a one-shot result channel and wait
//! with a bounded timeout; the timeout does not revoke the command, so
//! callers must be idempotent. Asynchronous callers fire and forget.

use crate::core::CoreServices;
use crate::orderbook::{RejectReason, Trade};
use crate::types::{Order, OrderId, UserId};
use crate::engine::OrderRequest;
use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info};

/// A command accepted by the matching thread.
#[derive(Debug)]
pub enum Command {
    /// Submit a new order.
    Submit {
        /// The order parameters.
        request: OrderRequest,
        /// One-shot result channel for synchronous callers.
        reply: Option<Sender<CommandResult>>,
    },
    /// Cancel one order.
    Cancel {
        /// The order's symbol.
        symbol: String,
        /// The order to cancel.
        order_id: OrderId,
        /// One-shot result channel.
        reply: Option<Sender<CommandResult>>,
    },
    /// Cancel every order of a user.
    CancelAll {
        /// The user whose orders are cancelled.
        user: UserId,
        /// One-shot result channel.
        reply: Option<Sender<CommandResult>>,
    },
    /// Modify an order's price and/or quantity.
    Modify {
        /// The order's symbol.
        symbol: String,
        /// The order to modify.
        order_id: OrderId,
        /// New limit price, if changing.
        new_price: Option<u64>,
        /// New quantity, if changing.
        new_qty: Option<u64>,
        /// One-shot result channel.
        reply: Option<Sender<CommandResult>>,
    },
    /// Stop the matching thread (drain, flush, exit).
    Stop,
}

/// Outcome of one command.
#[derive(Debug, Clone)]
pub enum CommandResult {
    /// The order was accepted; trades may have printed.
    Submitted {
        /// Final order snapshot.
        order: Order,
        /// Trades in execution order, including triggered-stop trades.
        trades: Vec<Trade>,
    },
    /// The command was refused; no state changed.
    Rejected(RejectReason),
    /// The order was cancelled.
    Cancelled(Order),
    /// Number of orders cancelled by a cancel-all.
    CancelledAll(usize),
    /// The modify completed (possibly trading on the replace path).
    Modified {
        /// Order snapshot after the modify.
        order: Order,
        /// Trades the replace produced, if any.
        trades: Vec<Trade>,
    },
}

/// Cloneable handle for enqueueing commands.
#[derive(Clone)]
pub struct CommandSender {
    tx: Sender<Command>,
    sync_timeout: Duration,
}

/// Failure to obtain a synchronous result.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// The command loop has stopped; the command was not enqueued.
    #[error("command queue closed")]
    QueueClosed,
    /// No result arrived in time. The command is still queued and will
    /// execute; only the wait was abandoned.
    #[error("timed out waiting for command result")]
    Timeout,
}

impl CommandSender {
    /// Enqueue a command without waiting for its result.
    pub fn send_async(&self, command: Command) -> Result<(), CommandError> {
        self.tx.send(command).map_err(|_| CommandError::QueueClosed)
    }

    /// Enqueue a command built around a fresh one-shot reply channel and
    /// wait for the result, bounded by the configured timeout.
    pub fn send_sync(
        &self,
        build: impl FnOnce(Sender<CommandResult>) -> Command,
    ) -> Result<CommandResult, CommandError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.tx
            .send(build(reply_tx))
            .map_err(|_| CommandError::QueueClosed)?;
        match reply_rx.recv_timeout(self.sync_timeout) {
            Ok(result) => Ok(result),
            Err(RecvTimeoutError::Timeout) => Err(CommandError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(CommandError::QueueClosed),
        }
    }
}

/// The running command loop: intake handle plus the worker thread.
pub struct Sequencer {
    sender: CommandSender,
    worker: Option<JoinHandle<()>>,
}

impl Sequencer {
    /// Spawn the matching thread over `services`.
    #[must_use]
    pub fn start(services: Arc<CoreServices>, sync_timeout: Duration) -> Self {
        let (tx, rx) = unbounded();
        let worker = spawn_worker(services, rx);
        Self {
            sender: CommandSender {
                tx,
                sync_timeout,
            },
            worker: Some(worker),
        }
    }

    /// The intake handle.
    #[must_use]
    pub fn sender(&self) -> CommandSender {
        self.sender.clone()
    }

    /// Stop intake, drain the queue, flush the journal, and join the
    /// worker.
    pub fn shutdown(mut self) {
        let _ = self.sender.tx.send(Command::Stop);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("matching thread panicked during shutdown");
            }
        }
    }
}

fn spawn_worker(services: Arc<CoreServices>, rx: Receiver<Command>) -> JoinHandle<()> {
    thread::Builder::new()
        .name("dexcore-matching".to_string())
        .spawn(move || {
            info!("matching thread started");
            loop {
                match rx.recv() {
                    Ok(Command::Stop) | Err(_) => break,
                    Ok(command) => dispatch(&services, command),
                }
            }
            // Drain commands that raced the stop, then make the journal
            // durable before exiting.
            while let Ok(command) = rx.try_recv() {
                if !matches!(command, Command::Stop) {
                    dispatch(&services, command);
                }
            }
            if let Err(e) = services.journal.flush() {
                error!(error = %e, "journal flush on shutdown failed");
            }
            info!("matching thread stopped");
        })
        .expect("failed to spawn matching thread")
}

fn dispatch(services: &CoreServices, command: Command) {
    match command {
        Command::Submit { request, reply } => {
            let result = match services.execute_submit(request) {
                Ok((order, trades)) => CommandResult::Submitted { order, trades },
                Err(reason) => CommandResult::Rejected(reason),
            };
            deliver(reply, result);
        }
        Command::Cancel {
            symbol,
            order_id,
            reply,
        } => {
            let result = match services.execute_cancel(&symbol, order_id) {
                Ok(order) => CommandResult::Cancelled(order),
                Err(reason) => CommandResult::Rejected(reason),
            };
            deliver(reply, result);
        }
        Command::CancelAll { user, reply } => {
            let count = services.execute_cancel_all(user);
            deliver(reply, CommandResult::CancelledAll(count));
        }
        Command::Modify {
            symbol,
            order_id,
            new_price,
            new_qty,
            reply,
        } => {
            let result = match services.execute_modify(&symbol, order_id, new_price, new_qty) {
                Ok((order, trades)) => CommandResult::Modified { order, trades },
                Err(reason) => CommandResult::Rejected(reason),
            };
            deliver(reply, result);
        }
        Command::Stop => {}
    }
}

/// Deliver a result to a synchronous caller. A closed channel means the
/// caller timed out and went away; the work stands either way.
fn deliver(reply: Option<Sender<CommandResult>>, result: CommandResult) {
    if let Some(reply) = reply {
        let _ = reply.send(result);
    }
}
