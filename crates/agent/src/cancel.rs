//! Cancellation helpers.
//!
//! Every suspension point of a run (generation call, stream receive, tool
//! invocation) races the caller's [`CancellationToken`]. A cancelled run
//! returns [`Error::Cancelled`] and finalizes nothing.

use std::future::Future;

use thinkloop_core::{Error, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Fail fast if the token has already fired.
pub(crate) fn check_cancelled(token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() {
        return Err(Error::Cancelled);
    }
    Ok(())
}

/// Drive `fut` to completion unless the token fires first.
pub(crate) async fn cancellable<F, T>(token: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    check_cancelled(token)?;
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Error::Cancelled),
        result = fut => result,
    }
}

/// Receive the next item of a channel, observing the token.
///
/// `Ok(None)` means the sender side closed.
pub(crate) async fn recv_cancellable<T>(
    token: &CancellationToken,
    rx: &mut mpsc::Receiver<T>,
) -> Result<Option<T>> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Error::Cancelled),
        item = rx.recv() => Ok(item),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn completes_when_not_cancelled() {
        let token = CancellationToken::new();
        let value = cancellable(&token, async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn already_cancelled_token_short_circuits() {
        let token = CancellationToken::new();
        token.cancel();
        let err = cancellable(&token, async { Ok(()) }).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_pending_future() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let err = cancellable(&token, async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn recv_reports_closed_channel() {
        let token = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel::<u8>(1);
        tx.send(1).await.unwrap();
        drop(tx);
        assert_eq!(recv_cancellable(&token, &mut rx).await.unwrap(), Some(1));
        assert_eq!(recv_cancellable(&token, &mut rx).await.unwrap(), None);
    }
}
