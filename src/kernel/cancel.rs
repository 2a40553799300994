use tokio_util::sync::CancellationToken;

/// Identifies one call attempt. Async completions tagged with an older epoch
/// are stale and must not touch the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct CallEpoch(pub u64);

impl CallEpoch {
    pub fn next(self) -> Self {
        CallEpoch(self.0 + 1)
    }
}

/// Cancellation root for everything spawned on behalf of one call.
#[derive(Debug, Clone)]
pub struct CallScope {
    pub epoch: CallEpoch,
    token: CancellationToken,
}

impl CallScope {
    pub fn child(&self) -> CancellationToken {
        self.token.child_token()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Tracks the live call scope. At most one scope is live at a time.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    epoch: CallEpoch,
    current: Option<CallScope>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a scope for a new call attempt, cancelling any previous one.
    pub fn begin(&mut self) -> CallScope {
        self.cancel_current();
        self.epoch = self.epoch.next();
        let scope = CallScope { epoch: self.epoch, token: CancellationToken::new() };
        self.current = Some(scope.clone());
        scope
    }

    pub fn current(&self) -> Option<&CallScope> {
        self.current.as_ref()
    }

    pub fn is_current(&self, epoch: CallEpoch) -> bool {
        self.current.as_ref().map(|s| s.epoch == epoch).unwrap_or(false)
    }

    pub fn cancel_current(&mut self) {
        if let Some(scope) = self.current.take() {
            scope.token.cancel();
        }
    }
}
