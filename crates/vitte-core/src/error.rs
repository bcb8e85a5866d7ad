//! error.rs — the VM's flat error taxonomy.
//!
//! One `thiserror` variant per kind in the spec's error model. Each carries
//! the message the interpreter built and, once the call stack has been
//! unwound, up to 8 frame snapshots (innermost first — the same order the
//! original collects them while popping frames).

use std::fmt;

/// Maximum number of frame snapshots kept on an error.
pub const MAX_SNAPSHOTS: usize = 8;

/// A short textual record of a frame's location at unwind time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub file: String,
    pub line: i32,
    pub source: String,
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "  File \"{}\", line {}\n    {}", self.file, self.line, self.source.trim())
    }
}

/// The VM's single error type. `kind()` returns the short contract name
/// (`"TypeError"`, `"NameError"`, ...) used by `RAISE_ERROR` and by the
/// embedder-visible traceback.
#[derive(Debug, thiserror::Error)]
pub enum VmError {
    #[error("TypeError: {message}")]
    TypeError { message: String, snapshots: Vec<Snapshot> },
    #[error("NameError: {message}")]
    NameError { message: String, snapshots: Vec<Snapshot> },
    #[error("IndexError: {message}")]
    IndexError { message: String, snapshots: Vec<Snapshot> },
    #[error("ValueError: {message}")]
    ValueError { message: String, snapshots: Vec<Snapshot> },
    #[error("ZeroDivisionError: {message}")]
    ZeroDivisionError { message: String, snapshots: Vec<Snapshot> },
    #[error("AttributeError: {message}")]
    AttributeError { message: String, snapshots: Vec<Snapshot> },
    #[error("ImportError: {message}")]
    ImportError { message: String, snapshots: Vec<Snapshot> },
    #[error("AssertionError: {message}")]
    AssertionError { message: String, snapshots: Vec<Snapshot> },
    #[error("KeyboardInterrupt: {message}")]
    KeyboardInterrupt { message: String, snapshots: Vec<Snapshot> },
    #[error("RecursionError: {message}")]
    RecursionError { message: String, snapshots: Vec<Snapshot> },
    #[error("KeyError: {message}")]
    KeyError { message: String, snapshots: Vec<Snapshot> },
    #[error("UnexpectedError: {message}")]
    UnexpectedError { message: String, snapshots: Vec<Snapshot> },
}

impl VmError {
    /// The short contract name of this error's kind.
    pub fn kind(&self) -> &'static str {
        match self {
            VmError::TypeError { .. } => "TypeError",
            VmError::NameError { .. } => "NameError",
            VmError::IndexError { .. } => "IndexError",
            VmError::ValueError { .. } => "ValueError",
            VmError::ZeroDivisionError { .. } => "ZeroDivisionError",
            VmError::AttributeError { .. } => "AttributeError",
            VmError::ImportError { .. } => "ImportError",
            VmError::AssertionError { .. } => "AssertionError",
            VmError::KeyboardInterrupt { .. } => "KeyboardInterrupt",
            VmError::RecursionError { .. } => "RecursionError",
            VmError::KeyError { .. } => "KeyError",
            VmError::UnexpectedError { .. } => "UnexpectedError",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            VmError::TypeError { message, .. }
            | VmError::NameError { message, .. }
            | VmError::IndexError { message, .. }
            | VmError::ValueError { message, .. }
            | VmError::ZeroDivisionError { message, .. }
            | VmError::AttributeError { message, .. }
            | VmError::ImportError { message, .. }
            | VmError::AssertionError { message, .. }
            | VmError::KeyboardInterrupt { message, .. }
            | VmError::RecursionError { message, .. }
            | VmError::KeyError { message, .. }
            | VmError::UnexpectedError { message, .. } => message,
        }
    }

    pub fn snapshots(&self) -> &[Snapshot] {
        match self {
            VmError::TypeError { snapshots, .. }
            | VmError::NameError { snapshots, .. }
            | VmError::IndexError { snapshots, .. }
            | VmError::ValueError { snapshots, .. }
            | VmError::ZeroDivisionError { snapshots, .. }
            | VmError::AttributeError { snapshots, .. }
            | VmError::ImportError { snapshots, .. }
            | VmError::AssertionError { snapshots, .. }
            | VmError::KeyboardInterrupt { snapshots, .. }
            | VmError::RecursionError { snapshots, .. }
            | VmError::KeyError { snapshots, .. }
            | VmError::UnexpectedError { snapshots, .. } => snapshots,
        }
    }

    /// Renders kind + message + snapshot stack the way the embedder's
    /// stderr traceback does.
    pub fn render(&self) -> String {
        let mut out = format!("Traceback (most recent call last):\n");
        for snap in self.snapshots().iter().rev() {
            out.push_str(&snap.to_string());
            out.push('\n');
        }
        out.push_str(&format!("{}: {}", self.kind(), self.message()));
        out
    }

    /// Builds an error of `kind` with no snapshots yet (before unwinding).
    pub fn bare(kind: &str, message: impl Into<String>) -> Self {
        Self::with_snapshots(kind, message, Vec::new())
    }

    pub fn with_snapshots(kind: &str, message: impl Into<String>, snapshots: Vec<Snapshot>) -> Self {
        let message = message.into();
        match kind {
            "TypeError" => VmError::TypeError { message, snapshots },
            "NameError" => VmError::NameError { message, snapshots },
            "IndexError" => VmError::IndexError { message, snapshots },
            "ValueError" => VmError::ValueError { message, snapshots },
            "ZeroDivisionError" => VmError::ZeroDivisionError { message, snapshots },
            "AttributeError" => VmError::AttributeError { message, snapshots },
            "ImportError" => VmError::ImportError { message, snapshots },
            "AssertionError" => VmError::AssertionError { message, snapshots },
            "KeyboardInterrupt" => VmError::KeyboardInterrupt { message, snapshots },
            "RecursionError" => VmError::RecursionError { message, snapshots },
            "KeyError" => VmError::KeyError { message, snapshots },
            _ => VmError::UnexpectedError { message, snapshots },
        }
    }

    /// Returns a copy of this error with its snapshot stack replaced,
    /// truncated to [`MAX_SNAPSHOTS`].
    pub fn with_unwound_snapshots(self, mut snapshots: Vec<Snapshot>) -> Self {
        snapshots.truncate(MAX_SNAPSHOTS);
        Self::with_snapshots(self.kind(), self.message().to_string(), snapshots)
    }
}

pub type VmResult<T> = Result<T, VmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_kind_and_message() {
        let e = VmError::bare("TypeError", "expected int");
        assert!(e.render().contains("TypeError: expected int"));
    }

    #[test]
    fn snapshot_cap_enforced() {
        let snaps: Vec<_> = (0..20)
            .map(|i| Snapshot { file: "a.vit".into(), line: i, source: "x".into() })
            .collect();
        let e = VmError::bare("ValueError", "oops").with_unwound_snapshots(snaps);
        assert_eq!(e.snapshots().len(), MAX_SNAPSHOTS);
    }
}
