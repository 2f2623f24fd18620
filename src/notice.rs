//! User-visible notifications ("toasts").
//!
//! Failures that must not block the form (lookup errors, autosave errors,
//! a failed status mark after export) are reported here instead of being
//! returned. The UI drains the queue whenever it repaints.

use std::sync::{Arc, Mutex};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

/// Cloneable handle to a shared notice queue.
///
/// Background tasks (the autosave debouncer) hold a clone and push into the
/// same queue the workflow drains.
#[derive(Debug, Clone, Default)]
pub struct Notices {
    inner: Arc<Mutex<Vec<Notice>>>,
}

impl Notices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, notice: Notice) {
        if let Ok(mut queue) = self.inner.lock() {
            queue.push(notice);
        }
    }

    /// Take every pending notice, oldest first.
    pub fn drain(&self) -> Vec<Notice> {
        match self.inner.lock() {
            Ok(mut queue) => std::mem::take(&mut *queue),
            Err(_) => Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().map(|q| q.is_empty()).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_queue() {
        let notices = Notices::new();
        let handle = notices.clone();
        handle.push(Notice::error("save failed"));
        assert!(!notices.is_empty());
        assert_eq!(notices.drain(), vec![Notice::error("save failed")]);
        assert!(handle.is_empty());
    }
}
