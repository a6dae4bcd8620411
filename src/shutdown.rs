use crate::errors::Result;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Terminate,
    Interrupt,
    Hangup,
}

impl ShutdownSignal {
    /// SIGTERM and SIGINT; a repeat of either forces the process out.
    pub fn is_immediate(self) -> bool {
        !matches!(self, ShutdownSignal::Hangup)
    }
}

/// Install handlers for SIGTERM, SIGINT and SIGHUP.
///
/// Returns a `CancellationToken` that is cancelled when any of them arrives.
/// SIGHUP asks for a graceful stop; the daemon never holds more than the
/// current print, so it cancels the same token and only logs differently.
/// The handlers stay installed: a SIGTERM or SIGINT received after the token
/// was cancelled exits the process with status 1 without waiting for the
/// current print.
/// Must be called from within the Tokio runtime.
pub fn install_shutdown_handler() -> Result<CancellationToken> {
    let token = CancellationToken::new();

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sighup = signal(SignalKind::hangup())?;

    let (tx, rx) = unbounded_channel();

    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                _ = sigterm.recv() => ShutdownSignal::Terminate,
                _ = sigint.recv() => ShutdownSignal::Interrupt,
                _ = sighup.recv() => ShutdownSignal::Hangup,
            };
            if tx.send(received).is_err() {
                break;
            }
        }
    });

    let token_clone = token.clone();
    tokio::spawn(async move {
        if watch_signals(rx, token_clone).await {
            warn!("Second shutdown signal received, exiting without finishing the current print");
            std::process::exit(1);
        }
    });

    Ok(token)
}

/// Cancel `token` on the first signal, then wait for a forced exit.
///
/// Returns `true` when an immediate signal arrives after cancellation and
/// `false` when the signal stream ends first.
async fn watch_signals(
    mut signals: UnboundedReceiver<ShutdownSignal>,
    token: CancellationToken,
) -> bool {
    let Some(first) = signals.recv().await else {
        return false;
    };
    match first {
        ShutdownSignal::Terminate => info!("Received SIGTERM, exiting"),
        ShutdownSignal::Interrupt => info!("Received SIGINT, exiting"),
        ShutdownSignal::Hangup => {
            info!("Received SIGHUP, finishing current print before exiting")
        }
    }
    token.cancel();

    while let Some(next) = signals.recv().await {
        if next.is_immediate() {
            return true;
        }
        info!("Already shutting down, ignoring {:?}", next);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hangup_then_interrupt_forces_exit() {
        let (tx, rx) = unbounded_channel();
        let token = CancellationToken::new();
        tx.send(ShutdownSignal::Hangup).unwrap();
        tx.send(ShutdownSignal::Interrupt).unwrap();

        assert!(watch_signals(rx, token.clone()).await);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_repeated_hangup_keeps_graceful_stop() {
        let (tx, rx) = unbounded_channel();
        let token = CancellationToken::new();
        tx.send(ShutdownSignal::Interrupt).unwrap();
        tx.send(ShutdownSignal::Hangup).unwrap();
        tx.send(ShutdownSignal::Hangup).unwrap();
        drop(tx);

        assert!(!watch_signals(rx, token.clone()).await);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_second_terminate_forces_exit() {
        let (tx, rx) = unbounded_channel();
        let token = CancellationToken::new();
        let watcher = tokio::spawn(watch_signals(rx, token.clone()));

        tx.send(ShutdownSignal::Terminate).unwrap();
        token.cancelled().await;
        assert!(!watcher.is_finished());

        tx.send(ShutdownSignal::Terminate).unwrap();
        assert!(watcher.await.unwrap());
    }

    #[test]
    fn test_immediate_signals() {
        assert!(ShutdownSignal::Terminate.is_immediate());
        assert!(ShutdownSignal::Interrupt.is_immediate());
        assert!(!ShutdownSignal::Hangup.is_immediate());
    }
}
