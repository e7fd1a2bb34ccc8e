//! Entry editor shell: hosts tabs and binds presence to open editors.

pub mod workspace;

pub use workspace::{ShellConfig, Workspace};
