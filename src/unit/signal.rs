use futures_util::future::join_all;
use tokio::sync::watch;

/// One-shot, multi-waiter completion broadcast
///
/// Waiters that subscribe after the signal fired return immediately.
#[derive(Debug)]
pub struct CompletionSignal {
    tx: watch::Sender<bool>,
}

impl CompletionSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Fires the signal. Returns false if it had already fired.
    pub fn fire(&self) -> bool {
        self.tx.send_if_modified(|fired| {
            if *fired {
                false
            } else {
                *fired = true;
                true
            }
        })
    }

    pub fn is_fired(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Waits until every signal has fired
pub async fn wait_all<'a, I>(signals: I)
where
    I: IntoIterator<Item = &'a CompletionSignal>,
{
    join_all(signals.into_iter().map(CompletionSignal::wait)).await;
}
