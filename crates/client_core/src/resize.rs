//! Viewport resize debouncing.
//!
//! Raw sizes arrive on every layout pass during a drag or rotation. Only the
//! last size that stays put for the debounce window is published, and only
//! when it lands in a different rounded bucket than the last published one.

use std::time::Duration;

use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::debug;

use crate::pagination::Viewport;

pub fn spawn_viewport_debouncer(
    mut raw: mpsc::Receiver<Viewport>,
    window: Duration,
) -> (watch::Receiver<Option<Viewport>>, JoinHandle<()>) {
    let (settled_tx, settled_rx) = watch::channel(None);

    let handle = tokio::spawn(async move {
        while let Some(mut latest) = raw.recv().await {
            let mut coalesced = 0usize;
            let closed = loop {
                tokio::select! {
                    next = raw.recv() => match next {
                        Some(viewport) => {
                            latest = viewport;
                            coalesced += 1;
                        }
                        None => break true,
                    },
                    _ = tokio::time::sleep(window) => break false,
                }
            };

            publish(&settled_tx, latest, coalesced);
            if closed {
                return;
            }
        }
    });

    (settled_rx, handle)
}

fn publish(settled: &watch::Sender<Option<Viewport>>, viewport: Viewport, coalesced: usize) {
    settled.send_if_modified(|current| {
        let unchanged = current
            .map(|previous| previous.rounded() == viewport.rounded())
            .unwrap_or(false);
        if unchanged {
            return false;
        }
        let (width, height) = viewport.rounded();
        debug!(width, height, coalesced, "viewport settled");
        *current = Some(viewport);
        true
    });
}
