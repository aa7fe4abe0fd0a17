//! View handles.
//!
//! A [`View`] scopes backend fetches to the lifetime of a screen. Once the
//! view is closed or dropped, in-flight fetches resolve to `None` and
//! their responses never reach the stores.

use std::future::Future;

use tokio_util::sync::CancellationToken;

use super::events::AppEvent;
use super::workspace::{RefreshSummary, Workspace};
use crate::domain::{Capsule, CapsuleId, Email, EmailId, Session};
use crate::error::{CoreError, Result};

/// Fetch scope tied to one screen.
pub struct View {
    id: u64,
    token: CancellationToken,
    workspace: Workspace,
}

impl View {
    pub(crate) fn new(id: u64, workspace: Workspace) -> Self {
        Self {
            id,
            token: CancellationToken::new(),
            workspace,
        }
    }

    /// Identifier, unique within the workspace.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Closes the view, discarding any fetch still in flight.
    pub fn close(&self) {
        self.token.cancel();
    }

    /// Returns true once the view is closed.
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Runs `fetch` unless the view closes first.
    async fn guarded<T, F>(&self, fetch: F) -> Result<Option<T>>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => {
                tracing::debug!(view_id = self.id, "View closed, discarding fetch");
                self.workspace
                    .events()
                    .publish(AppEvent::StaleResponseDiscarded { view_id: self.id });
                Ok(None)
            }
            result = fetch => result.map(Some),
        }
    }

    /// Fetches one email and merges it into the store.
    ///
    /// Returns the stored copy, which keeps any unconfirmed local flags.
    pub async fn load_email(&self, session: &Session, id: &EmailId) -> Result<Option<Email>> {
        let backend = self.workspace.backend();
        let mark = self.workspace.email_mark();
        let fetch = async { backend.get_email(session, id).await.map_err(CoreError::from) };

        match self.guarded(fetch).await? {
            Some(email) => self.workspace.ingest_email(email, mark).map(Some),
            None => Ok(None),
        }
    }

    /// Fetches one capsule and merges it into the store.
    pub async fn load_capsule(&self, session: &Session, id: &CapsuleId) -> Result<Option<Capsule>> {
        let backend = self.workspace.backend();
        let mark = self.workspace.capsule_mark();
        let fetch = async { backend.get_capsule(session, id).await.map_err(CoreError::from) };

        match self.guarded(fetch).await? {
            Some(capsule) => self.workspace.ingest_capsule(capsule, mark).map(Some),
            None => Ok(None),
        }
    }

    /// Refreshes the whole workspace unless the view closes first.
    pub async fn refresh(&self, session: &Session) -> Result<Option<RefreshSummary>> {
        match self.guarded(self.workspace.fetch_all(session)).await? {
            Some(snapshot) => Ok(Some(self.workspace.apply_refresh(snapshot))),
            None => Ok(None),
        }
    }
}

impl Drop for View {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl std::fmt::Debug for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("View")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
