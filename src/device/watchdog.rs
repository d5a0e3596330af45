use std::future::pending;
use futures::channel::mpsc::UnboundedReceiver;
use futures::StreamExt;
use log::{debug, info};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::device::types::Status;

/// Watches the raw status updates of one connection.
///
/// The timer is armed by the first update and pushed back by every following one. If `silence`
/// passes without an update, `on_silence` runs once and the watchdog stops; a new connection is
/// expected to start a new watchdog.
pub fn spawn_watchdog<F>(
    cancel: CancellationToken,
    mut updates: UnboundedReceiver<Status>,
    silence: Duration,
    on_silence: F,
) -> JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    spawn(async move {
        let mut deadline: Option<Instant> = None;

        loop {
            let expired = async move {
                match deadline {
                    Some(deadline) => sleep_until(deadline).await,
                    None => pending::<()>().await,
                }
            };

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("Watchdog cancelled");
                    return;
                },
                update = updates.next() => match update {
                    Some(_) => deadline = Some(Instant::now() + silence),
                    None => return,
                },
                _ = expired => {
                    info!("No feedback received for {:?}", silence);
                    on_silence();
                    return;
                },
            }
        }
    })
}
