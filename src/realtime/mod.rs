// Live visible-set tracking
// Bridges the store's change feed to a continuously refreshed snapshot of
// who is visible right now.

pub mod watcher;

pub use watcher::VisibleSetWatcher;
