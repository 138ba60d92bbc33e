//! `MailLite` - Headless client
//!
//! Logs in, prints the folders and server statistics, then follows new-mail
//! notifications until Ctrl-C.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod settings;

use anyhow::Context;
use maillite_core::{ConnectionState, Folder, MessageSummary, Session};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use settings::{PASSWORD_VAR, Settings, settings_path};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "maillite=info,maillite_core=info,maillite_proto=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting MailLite");

    let path = settings_path();
    let settings = Settings::load(&path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?
        .with_default_read_state();

    let username = std::env::args()
        .nth(1)
        .or(settings.username)
        .context("no username given on the command line or in the settings file")?;
    let password =
        std::env::var(PASSWORD_VAR).with_context(|| format!("{PASSWORD_VAR} is not set"))?;

    let session = Session::new(settings.session);

    let (tx, mut new_mail) = mpsc::unbounded_channel();
    session.on_new_mail(move |user: &str, count: u32| {
        let _ = tx.send((user.to_string(), count));
    });

    session
        .login(&username, &password)
        .await
        .context("login failed")?;

    for folder in Folder::ALL {
        match session.list_folder(folder).await {
            Ok(summaries) => print_folder(folder, &summaries),
            Err(e) => tracing::warn!(%folder, error = %e, "Failed to list folder"),
        }
    }
    println!("{}", session.get_stats().await);

    let mut states = session.watch_state();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Some((user, count)) = new_mail.recv() => {
                info!(%user, count, "New mail");
                match session.list_folder(Folder::Inbox).await {
                    Ok(summaries) => print_folder(Folder::Inbox, &summaries),
                    Err(e) => tracing::warn!(error = %e, "Failed to refresh inbox"),
                }
            }
            Ok(()) = states.changed() => {
                let state = *states.borrow_and_update();
                info!(%state, "Connection state changed");
                if state == ConnectionState::Disconnected {
                    break;
                }
            }
        }
    }

    session.logout().await;
    Ok(())
}

fn print_folder(folder: Folder, summaries: &[MessageSummary]) {
    println!("== {folder} ({})", summaries.len());
    for summary in summaries {
        let marker = if summary.read { ' ' } else { '*' };
        let when = summary.timestamp().map_or_else(
            || summary.timestamp_ms.to_string(),
            |t| t.format("%Y-%m-%d %H:%M").to_string(),
        );
        println!(
            "{marker} {:<24} {:<16} {:>6}  {when}  {}",
            summary.id, summary.from, summary.size, summary.subject,
        );
    }
}
