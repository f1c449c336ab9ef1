//! The write-once transport-error cell.

use tokio::sync::watch;

use crate::error::PgPipeError;

/// A single-slot, write-once synchronisation cell holding the connection's
/// terminal error.
///
/// Multiple writers race with put-if-empty semantics; only the first wins.
/// Readers either peek ([`get`](Self::get)) or wait for the slot to fill
/// ([`tripped`](Self::tripped)).
#[derive(Debug, Clone)]
pub(crate) struct TransportFuse {
    tx: std::sync::Arc<watch::Sender<Option<PgPipeError>>>,
    rx: watch::Receiver<Option<PgPipeError>>,
}

impl TransportFuse {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(None);
        Self {
            tx: std::sync::Arc::new(tx),
            rx,
        }
    }

    /// Put-if-empty: publish `err` unless a terminal error is already set.
    /// Returns `true` if this call won the race.
    pub fn trip(&self, err: PgPipeError) -> bool {
        let mut err = Some(err);
        self.tx.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = err.take();
                true
            } else {
                false
            }
        })
    }

    /// The terminal error, if one has been published.
    pub fn get(&self) -> Option<PgPipeError> {
        self.rx.borrow().clone()
    }

    /// The terminal error, or the stop sentinel if somehow unset.
    pub fn get_or_stopped(&self) -> PgPipeError {
        self.get().unwrap_or_else(PgPipeError::stopped)
    }

    /// Wait until a terminal error is published, then return it.
    pub async fn tripped(&self) -> PgPipeError {
        let mut rx = self.rx.clone();
        match rx.wait_for(Option::is_some).await {
            Ok(slot) => slot.clone().expect("waited for a filled slot"),
            // all senders dropped without filling the slot
            Err(_) => PgPipeError::stopped(),
        }
    }
}
