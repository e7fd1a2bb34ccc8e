//! Selective restore of an entry from a historical snapshot.
//!
//! The comparison view registers one restore callback per field path that
//! exists in both versions. The user toggles paths between "keep current"
//! and "restore"; `restore_all` then runs every registered callback.

use indexmap::IndexMap;
use std::fmt;
use thiserror::Error;

/// A field path such as `["fields", "title", "en-US"]`.
pub type FieldPath = Vec<String>;

/// Writes one snapshot value back into the live document.
pub type RestoreFn = Box<dyn FnMut() -> Result<(), RestoreError> + Send>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RestoreError {
    /// The snapshot has no value for the path.
    #[error("snapshot has no value at {0}")]
    MissingValue(String),
    /// The live document rejected the write.
    #[error("document rejected restore: {0}")]
    Document(String),
}

/// One comparable path, as registered by the comparison view.
pub struct PathRegistration {
    restore_fn: Option<RestoreFn>,
    is_different: bool,
}

impl PathRegistration {
    pub fn new(is_different: bool) -> Self {
        Self {
            restore_fn: None,
            is_different,
        }
    }

    pub fn restore_with<F>(mut self, restore_fn: F) -> Self
    where
        F: FnMut() -> Result<(), RestoreError> + Send + 'static,
    {
        self.restore_fn = Some(Box::new(restore_fn));
        self
    }
}

impl fmt::Debug for PathRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathRegistration")
            .field("has_restore_fn", &self.restore_fn.is_some())
            .field("is_different", &self.is_different)
            .finish()
    }
}

/// Outcome of [`VersionPicker::restore_all`].
#[derive(Debug, Default)]
pub struct RestoreReport {
    /// Callbacks run, failed ones included.
    pub invoked: usize,
    /// Registration index and error of every failed callback.
    pub failures: Vec<(usize, RestoreError)>,
}

impl RestoreReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Default)]
pub struct VersionPicker {
    /// Joined path -> segments as first marked.
    to_restore: IndexMap<String, FieldPath>,
    restore_fns: Vec<RestoreFn>,
    difference_count: usize,
}

fn to_path(path: &[impl AsRef<str>]) -> FieldPath {
    path.iter().map(|s| s.as_ref().to_string()).collect()
}

/// Identity of a path in the restore set.
fn path_key(path: &[impl AsRef<str>]) -> String {
    path.iter().map(|s| s.as_ref()).collect::<Vec<&str>>().join(".")
}

impl VersionPicker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a comparable path. Paths without a callback restore nothing.
    pub fn register_path(&mut self, registration: PathRegistration) {
        if registration.is_different {
            self.difference_count += 1;
        }
        let restore_fn: RestoreFn = match registration.restore_fn {
            Some(restore_fn) => restore_fn,
            None => Box::new(|| Ok(())),
        };
        self.restore_fns.push(restore_fn);
    }

    /// Mark a path for restore. Marking twice has no further effect.
    pub fn restore(&mut self, path: &[impl AsRef<str>]) {
        self.to_restore
            .entry(path_key(path))
            .or_insert_with(|| to_path(path));
    }

    /// Keep the current value of a path.
    pub fn keep(&mut self, path: &[impl AsRef<str>]) {
        self.to_restore.shift_remove(&path_key(path));
    }

    pub fn keep_all(&mut self) {
        self.to_restore.clear();
    }

    pub fn is_restoring(&self, path: &[impl AsRef<str>]) -> bool {
        self.to_restore.contains_key(&path_key(path))
    }

    /// Marked paths in the order they were first marked.
    pub fn paths_to_restore(&self) -> Vec<FieldPath> {
        self.to_restore.values().cloned().collect()
    }

    /// Number of registered paths whose values differ between versions.
    pub fn difference_count(&self) -> usize {
        self.difference_count
    }

    pub fn registered_count(&self) -> usize {
        self.restore_fns.len()
    }

    /// Run every registered callback in registration order.
    ///
    /// A failing callback is logged and does not stop the rest.
    pub fn restore_all(&mut self) -> RestoreReport {
        let mut report = RestoreReport::default();
        for (index, restore_fn) in self.restore_fns.iter_mut().enumerate() {
            report.invoked += 1;
            if let Err(e) = restore_fn() {
                log::warn!("Restore callback #{index} failed: {e}");
                report.failures.push((index, e));
            }
        }
        log::debug!(
            "Restored {} paths ({} failed)",
            report.invoked - report.failures.len(),
            report.failures.len()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn counting(
        calls: &Arc<Mutex<Vec<usize>>>,
        n: usize,
    ) -> impl FnMut() -> Result<(), RestoreError> + Send + 'static {
        let calls = calls.clone();
        move || {
            calls.lock().unwrap().push(n);
            Ok(())
        }
    }

    #[test]
    fn test_restore_set_semantics() {
        let mut picker = VersionPicker::new();
        picker.restore(&["fields", "title", "en-US"]);
        picker.restore(&["fields", "title", "en-US"]);
        picker.restore(&["fields", "body", "en-US"]);

        assert_eq!(picker.paths_to_restore().len(), 2);
        assert!(picker.is_restoring(&["fields", "title", "en-US"]));

        picker.keep(&["fields", "title", "en-US"]);
        assert!(!picker.is_restoring(&["fields", "title", "en-US"]));
        assert_eq!(
            picker.paths_to_restore(),
            vec![vec!["fields".to_string(), "body".to_string(), "en-US".to_string()]]
        );

        // Keeping an unmarked path is a no-op.
        picker.keep(&["fields", "slug"]);
        assert_eq!(picker.paths_to_restore().len(), 1);
    }

    #[test]
    fn test_keep_all() {
        let mut picker = VersionPicker::new();
        picker.restore(&["a"]);
        picker.restore(&["b"]);
        picker.keep_all();
        assert!(picker.paths_to_restore().is_empty());
    }

    #[test]
    fn test_paths_preserve_marking_order() {
        let mut picker = VersionPicker::new();
        for path in [["z"], ["a"], ["m"]] {
            picker.restore(&path);
        }
        picker.keep(&["a"]);
        assert_eq!(picker.paths_to_restore(), vec![vec!["z"], vec!["m"]]);
    }

    #[test]
    fn test_joined_identity_dedups_paths() {
        let mut picker = VersionPicker::new();
        picker.restore(&["fields", "title"]);
        picker.restore(&["fields.title"]);

        assert_eq!(picker.paths_to_restore(), vec![vec!["fields", "title"]]);
        assert!(picker.is_restoring(&["fields.title"]));

        picker.keep(&["fields.title"]);
        assert!(!picker.is_restoring(&["fields", "title"]));
        assert!(picker.paths_to_restore().is_empty());
    }

    #[test]
    fn test_difference_count() {
        let mut picker = VersionPicker::new();
        picker.register_path(PathRegistration::new(true));
        picker.register_path(PathRegistration::new(false));
        picker.register_path(PathRegistration::new(true));

        assert_eq!(picker.difference_count(), 2);
        assert_eq!(picker.registered_count(), 3);
    }

    #[test]
    fn test_restore_all_runs_every_callback_in_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut picker = VersionPicker::new();
        picker.register_path(PathRegistration::new(true).restore_with(counting(&calls, 0)));
        picker.register_path(PathRegistration::new(false));
        picker.register_path(PathRegistration::new(false).restore_with(counting(&calls, 2)));

        let report = picker.restore_all();
        assert_eq!(report.invoked, 3);
        assert!(report.is_success());
        assert_eq!(*calls.lock().unwrap(), vec![0, 2]);
    }

    #[test]
    fn test_restore_all_continues_after_failure() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut picker = VersionPicker::new();
        picker.register_path(PathRegistration::new(true).restore_with(counting(&calls, 0)));
        picker.register_path(
            PathRegistration::new(true)
                .restore_with(|| Err(RestoreError::Document("field is read-only".into()))),
        );
        picker.register_path(PathRegistration::new(true).restore_with(counting(&calls, 2)));

        let report = picker.restore_all();
        assert_eq!(report.invoked, 3);
        assert_eq!(
            report.failures,
            vec![(1, RestoreError::Document("field is read-only".into()))]
        );
        assert_eq!(*calls.lock().unwrap(), vec![0, 2]);
    }

    #[test]
    fn test_restore_error_display() {
        let err = RestoreError::MissingValue("fields.title.en-US".into());
        assert_eq!(err.to_string(), "snapshot has no value at fields.title.en-US");
    }
}
