use anyhow::Result;
use crossbeam::channel::{bounded, Receiver};

/// Receives one message per Ctrl-C (or SIGTERM).
pub fn interrupt_channel() -> Result<Receiver<()>> {
    let (tx, rx) = bounded(1);

    ctrlc::set_handler(move || {
        let _ = tx.try_send(());
    })?;

    Ok(rx)
}
