//! capsule-mail - Entry point for the command-line client

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing_subscriber::EnvFilter;

use capsule_mail::config::Settings;
use capsule_mail::domain::Session;
use capsule_mail::providers::backend::HttpBackend;
use capsule_mail::Workspace;

#[tokio::main]
async fn main() -> Result<()> {
    let settings_path = std::env::var_os("CAPSULE_MAIL_CONFIG")
        .map(PathBuf::from)
        .or_else(Settings::default_path);
    let settings = match &settings_path {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.logging.filter))
        .context("invalid log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!(base_url = %settings.backend.base_url, "Starting capsule-mail");

    let user = std::env::var("CAPSULE_MAIL_USER").unwrap_or_else(|_| "me".to_string());
    let mut session = Session::new(user);
    if let Ok(token) = std::env::var("CAPSULE_MAIL_TOKEN") {
        session = session.with_token(token);
    }

    let backend = HttpBackend::from_settings(&settings.backend)
        .context("failed to build backend client")?;
    let workspace = Workspace::new(Arc::new(backend), settings.sync.clone());

    if std::env::args().nth(1).as_deref() == Some("process") {
        let processed = workspace.process_emails(&session, None).await?;
        tracing::info!(processed, "Processing run finished");
    } else {
        workspace.refresh(&session).await?;
    }

    let due = workspace.pending_follow_ups(Utc::now());
    tracing::info!(
        emails = workspace.emails().len(),
        unread = workspace.unread_count(),
        capsules = workspace.capsules().len(),
        due_follow_ups = due.len(),
        "Workspace loaded"
    );
    for item in due {
        tracing::info!(
            capsule = %item.capsule_title,
            due = %item.follow_up.due_date,
            "Follow-up due: {}",
            item.follow_up.description
        );
    }

    Ok(())
}
