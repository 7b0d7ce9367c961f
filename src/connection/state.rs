/// Transaction state of a [`Connection`](super::Connection).
///
/// Savepoints live inside the open variant, so a savepoint stack without an active
/// transaction cannot be represented.
pub(super) enum TxState<T> {
    Idle,
    Open { tx: T, savepoints: Vec<String> },
}

impl<T> TxState<T> {
    pub(super) fn is_open(&self) -> bool {
        matches!(self, TxState::Open { .. })
    }

    pub(super) fn depth(&self) -> usize {
        match self {
            TxState::Idle => 0,
            TxState::Open { savepoints, .. } => savepoints.len() + 1,
        }
    }

    pub(super) fn savepoints(&self) -> &[String] {
        match self {
            TxState::Idle => &[],
            TxState::Open { savepoints, .. } => savepoints,
        }
    }

    pub(super) fn tx_mut(&mut self) -> Option<&mut T> {
        match self {
            TxState::Idle => None,
            TxState::Open { tx, .. } => Some(tx),
        }
    }

    /// Move to `Idle`, handing back the native transaction if one was open.
    pub(super) fn take_tx(&mut self) -> Option<T> {
        match std::mem::replace(self, TxState::Idle) {
            TxState::Idle => None,
            TxState::Open { tx, .. } => Some(tx),
        }
    }
}
