use crate::core::model::ItemId;

/// Events emitted by the engine while resolving and downloading. The CLI
/// subscribes and decides what to print; failure events are expected output
/// under the per-item fault isolation policy, not crashes.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    ResolveStarted { url: String },
    ItemResolved { item_id: ItemId, title: String },
    ResolveFailed { url: String, message: String },
    DownloadStarted { item_id: ItemId, url: String },
    FileFinished { filename: String, counted: bool },
    DownloadFailed { item_id: ItemId, message: String },
    Error { scope: String, message: String },
    Info { scope: String, message: String },
}
