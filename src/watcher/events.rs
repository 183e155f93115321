//! Classification of raw filesystem notifications.
//!
//! The trigger is a rename-class event, not a plain data modification:
//! editors commonly save atomically by writing a temporary file and renaming
//! it over the target, so the rename is the signal that content has settled.
//! `Create` is also accepted for editors that write a brand-new file under
//! the watched name.

use std::path::PathBuf;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind};

/// True for event kinds that signal a completed save of the named file.
pub fn is_content_settled(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Modify(ModifyKind::Name(_)) | EventKind::Create(_)
    )
}

/// True for event kinds that remove the named file.
pub fn is_removal(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Remove(_))
}

/// Extract the paths in `event` whose content has settled.
///
/// For a paired rename the settled file is the rename target (second path);
/// a bare rename-from names a file that no longer exists and yields nothing.
pub fn settled_paths(event: &Event) -> Vec<PathBuf> {
    match &event.kind {
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Vec::new(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
            vec![event.paths[1].clone()]
        }
        kind if is_content_settled(kind) => event.paths.clone(),
        _ => Vec::new(),
    }
}
