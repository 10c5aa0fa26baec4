use tokio::sync::watch;

/// Whether the conversation view is in the foreground.
///
/// Subscribers hold a `watch::Receiver`; dropping it is the unsubscribe.
pub trait ActivitySignal: Send + Sync {
    fn is_foreground(&self) -> bool;

    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Signal flipped by the host (window focus, terminal commands, tests).
#[derive(Debug)]
pub struct ManualActivity {
    tx: watch::Sender<bool>,
}

impl ManualActivity {
    pub fn new(foreground: bool) -> Self {
        let (tx, _rx) = watch::channel(foreground);
        Self { tx }
    }

    pub fn set_foreground(&self, foreground: bool) {
        self.tx.send_if_modified(|current| {
            if *current == foreground {
                false
            } else {
                *current = foreground;
                true
            }
        });
    }
}

impl Default for ManualActivity {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ActivitySignal for ManualActivity {
    fn is_foreground(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// A host with no notion of backgrounding.
#[derive(Debug)]
pub struct AlwaysForeground {
    tx: watch::Sender<bool>,
}

impl AlwaysForeground {
    pub fn new() -> Self {
        Self {
            tx: watch::channel(true).0,
        }
    }
}

impl Default for AlwaysForeground {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivitySignal for AlwaysForeground {
    fn is_foreground(&self) -> bool {
        true
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}
