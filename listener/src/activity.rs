/// Edge-triggered "something changed" flag shared between the filesystem
/// watcher thread and the tick loop.
///
/// The watcher calls [`ActivityFlag::mark`] from its own notification thread;
/// the tick loop calls [`ActivityFlag::consume`] once per `TICK` event.  Both
/// operations go through the same mutex, so a mark racing a consume is either
/// observed by that consume or left pending for the next one.
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Default)]
pub struct ActivityFlag {
    occurred: Mutex<bool>,
}

impl ActivityFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records activity. Returns the value held before the call.
    pub fn mark(&self) -> bool {
        self.swap(true)
    }

    /// Reads and clears the flag. Returns the value held before the call.
    pub fn consume(&self) -> bool {
        self.swap(false)
    }

    fn swap(&self, value: bool) -> bool {
        // A panic while holding the lock cannot leave a bool half-written.
        let mut occurred = self.occurred.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *occurred, value)
    }
}
