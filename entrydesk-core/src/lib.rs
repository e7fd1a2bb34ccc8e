//! Single-user editing model: open tabs and version restore.

pub mod tabs;
pub mod version_picker;

pub use tabs::{
    ConfirmDialog, ListenerId, Propagation, TabEvent, TabEventKind, TabId, TabItem, TabList,
    TabOptions,
};
pub use version_picker::{PathRegistration, RestoreError, RestoreReport, VersionPicker};
