use anyhow::Result;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Clone, Debug, PartialEq)]
pub enum Signal {
    /// Finish the current row, save progress and stop
    Shutdown,
    /// Log progress
    Usr1,
    Usr2,
}

/// Start listening for process signals. The returned receiver gets a `Shutdown` for any of
/// INT, TERM, HUP or QUIT, after which the listener stops.
pub async fn listen() -> Result<broadcast::Receiver<Signal>> {
    let (tx, rx) = broadcast::channel(6);

    let mut int = signal(SignalKind::interrupt())?;
    let mut term = signal(SignalKind::terminate())?;
    let mut hup = signal(SignalKind::hangup())?;
    let mut quit = signal(SignalKind::quit())?;
    let mut usr1 = signal(SignalKind::user_defined1())?;
    let mut usr2 = signal(SignalKind::user_defined2())?;

    tokio::spawn(async move {
        // sending only fails when every receiver is gone, and then nobody cares anymore
        loop {
            tokio::select! {
                _ = int.recv() => {
                    debug!("Got SIGINT");
                    let _ = tx.send(Signal::Shutdown);
                    break;
                },
                _ = term.recv() => {
                    debug!("Got SIGTERM");
                    let _ = tx.send(Signal::Shutdown);
                    break;
                },
                _ = hup.recv() => {
                    let _ = tx.send(Signal::Shutdown);
                    break;
                },
                _ = quit.recv() => {
                    let _ = tx.send(Signal::Shutdown);
                    break;
                },
                _ = usr1.recv() => {
                    let _ = tx.send(Signal::Usr1);
                    continue;
                },
                _ = usr2.recv() => {
                    let _ = tx.send(Signal::Usr2);
                    continue;
                },
            }
        }
    });
    Ok(rx)
}
