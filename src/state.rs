use tokio::sync::watch;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub enum StreamState {
    Opening,
    Streaming,
    Closed,
    Errored(Error),
}

impl StreamState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamState::Closed | StreamState::Errored(_))
    }
}

/// Waits until the stream reaches a terminal state.
pub(crate) async fn wait_terminal(mut state: watch::Receiver<StreamState>) -> Result<()> {
    let state = state
        .wait_for(StreamState::is_terminal)
        .await
        .map_err(|_| Error::Discarded)?;

    match &*state {
        StreamState::Errored(err) => Err(err.clone()),
        _ => Ok(()),
    }
}
