use std::sync::Arc;

use notify::event::ModifyKind;
use notify::EventKind;

use crate::activity::ActivityFlag;

/// Filesystem change categories that can count as activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsEventKind {
    /// A path was renamed or moved.
    Moved,
    Created,
    Deleted,
    /// File contents or metadata changed.
    Modified,
}

impl FsEventKind {
    /// Maps a raw `notify` event kind onto one of the four categories.
    /// Access events and unclassified kinds yield `None`.
    pub fn classify(kind: &EventKind) -> Option<Self> {
        match kind {
            EventKind::Create(_) => Some(Self::Created),
            EventKind::Remove(_) => Some(Self::Deleted),
            EventKind::Modify(ModifyKind::Name(_)) => Some(Self::Moved),
            EventKind::Modify(_) => Some(Self::Modified),
            EventKind::Access(_) | EventKind::Any | EventKind::Other => None,
        }
    }
}

/// Which [`FsEventKind`]s mark the activity flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WatchMask {
    pub moved: bool,
    pub created: bool,
    pub deleted: bool,
    pub modified: bool,
}

impl WatchMask {
    /// The `--watch-all` shortcut.
    pub const ALL: Self = Self {
        moved: true,
        created: true,
        deleted: true,
        modified: true,
    };

    pub const NONE: Self = Self {
        moved: false,
        created: false,
        deleted: false,
        modified: false,
    };

    pub fn is_empty(&self) -> bool {
        *self == Self::NONE
    }

    pub fn contains(&self, kind: FsEventKind) -> bool {
        match kind {
            FsEventKind::Moved => self.moved,
            FsEventKind::Created => self.created,
            FsEventKind::Deleted => self.deleted,
            FsEventKind::Modified => self.modified,
        }
    }
}

/// Single entry point for watcher callbacks: marks the shared flag when the
/// event kind is enabled in the mask.
#[derive(Debug, Clone)]
pub struct EventFilter {
    mask: WatchMask,
    activity: Arc<ActivityFlag>,
}

impl EventFilter {
    pub fn new(mask: WatchMask, activity: Arc<ActivityFlag>) -> Self {
        Self { mask, activity }
    }

    /// Returns `true` when the event counted as activity.
    pub fn on_event(&self, kind: FsEventKind) -> bool {
        if !self.mask.contains(kind) {
            return false;
        }
        self.activity.mark();
        true
    }

    /// Classifies a raw `notify` event and forwards it to [`Self::on_event`].
    ///
    /// A rescan request means the backend dropped events, so it marks the
    /// flag whatever the mask says.
    pub fn on_notify_event(&self, event: &notify::Event) -> bool {
        if event.need_rescan() {
            tracing::warn!(paths = ?event.paths, "[watch] Events were lost, treating as activity");
            self.activity.mark();
            return true;
        }
        match FsEventKind::classify(&event.kind) {
            Some(kind) => {
                let counted = self.on_event(kind);
                tracing::debug!(?kind, paths = ?event.paths, counted, "filesystem event");
                counted
            }
            None => false,
        }
    }
}
