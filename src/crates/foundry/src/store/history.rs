use super::StateBackend;
use crate::error::Result;
use crate::models::ProjectState;
use futures::stream::{self, Stream};
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;

/// Async stream of committed versions
pub type VersionStream = Pin<Box<dyn Stream<Item = Result<ProjectState>> + Send + 'static>>;

/// Restartable view over a project's versions.
///
/// Each call to [`History::stream`] starts again from version 0 and reads
/// pages from the backend only as the consumer advances.
#[derive(Clone)]
pub struct History {
    backend: Arc<dyn StateBackend>,
    project_id: String,
    page_size: usize,
}

struct Cursor {
    next: u64,
    buffer: VecDeque<ProjectState>,
    exhausted: bool,
}

impl History {
    pub(super) fn new(backend: Arc<dyn StateBackend>, project_id: String, page_size: usize) -> Self {
        Self {
            backend,
            project_id,
            page_size: page_size.max(1),
        }
    }

    pub fn stream(&self) -> VersionStream {
        let cursor = Cursor {
            next: 0,
            buffer: VecDeque::new(),
            exhausted: false,
        };
        let backend = self.backend.clone();
        let project_id = self.project_id.clone();
        let page_size = self.page_size;

        Box::pin(stream::unfold(Some(cursor), move |cursor| {
            let backend = backend.clone();
            let project_id = project_id.clone();
            async move {
                let mut cursor = cursor?;
                if cursor.buffer.is_empty() && !cursor.exhausted {
                    match backend.versions(&project_id, cursor.next, page_size).await {
                        Ok(page) => {
                            cursor.exhausted = page.len() < page_size;
                            cursor.buffer.extend(page);
                        }
                        // Surface the error once, then end the stream
                        Err(e) => return Some((Err(e), None)),
                    }
                }
                let state = cursor.buffer.pop_front()?;
                cursor.next = state.version + 1;
                Some((Ok(state), Some(cursor)))
            }
        }))
    }
}

impl std::fmt::Debug for History {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("History")
            .field("project_id", &self.project_id)
            .field("page_size", &self.page_size)
            .finish()
    }
}
