//! Signal source: a FIFO queue of token ids with duplicate suppression.
//!
//! Producers (stdin, the dashboard) share a [`SignalSender`]; the engine
//! owns the single receiver. A token id is queued at most once for the
//! lifetime of the process.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Length in bytes of a decoded token id (an ed25519 public key).
const TOKEN_ID_BYTES: usize = 32;

/// True if `token_id` is base58 and decodes to 32 bytes.
pub fn is_valid_token_id(token_id: &str) -> bool {
    matches!(
        bs58::decode(token_id).into_vec(),
        Ok(bytes) if bytes.len() == TOKEN_ID_BYTES
    )
}

/// Result of offering a token id to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Queued,
    Duplicate,
    Invalid,
    /// The engine is no longer taking signals.
    Closed,
}

#[derive(Clone)]
pub struct SignalSender {
    tx: mpsc::Sender<String>,
    seen: Arc<Mutex<HashSet<String>>>,
}

/// Create the signal queue.
pub fn channel(capacity: usize) -> (SignalSender, mpsc::Receiver<String>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        SignalSender {
            tx,
            seen: Arc::new(Mutex::new(HashSet::new())),
        },
        rx,
    )
}

impl SignalSender {
    /// Queue `token_id` unless it is malformed or was seen before.
    /// Waits for room when the queue is full.
    pub async fn submit(&self, token_id: &str) -> SubmitOutcome {
        let token_id = token_id.trim();
        if !is_valid_token_id(token_id) {
            debug!(token = %token_id, "Rejected malformed token id");
            return SubmitOutcome::Invalid;
        }
        {
            let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
            if !seen.insert(token_id.to_string()) {
                return SubmitOutcome::Duplicate;
            }
        }
        match self.tx.send(token_id.to_string()).await {
            Ok(()) => {
                info!(token = %token_id, "Signal queued");
                SubmitOutcome::Queued
            }
            Err(_) => SubmitOutcome::Closed,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Feed one token id per line from `reader` until EOF or the queue closes.
/// Blank lines and `#` comments are skipped. Returns the number queued.
pub async fn read_lines<R>(reader: R, sender: SignalSender) -> usize
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut queued = 0;
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Signal input read failed");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match sender.submit(line).await {
            SubmitOutcome::Queued => queued += 1,
            SubmitOutcome::Duplicate => debug!(token = %line, "Duplicate signal dropped"),
            SubmitOutcome::Invalid => warn!(input = %line, "Ignoring line, not a token id"),
            SubmitOutcome::Closed => break,
        }
    }
    debug!(queued, "Signal input finished");
    queued
}
