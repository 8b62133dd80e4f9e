mod ui;

use std::{fs::File, io, sync::Arc};

use crossterm::{
    event::{DisableMouseCapture, EnableMouseCapture},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use taskers_live::{
    config::CONFIG_FILE, store::memory::InMemoryStore, AppConfig, LiveTaskList,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load_or_default(CONFIG_FILE)?.with_env_overrides();
    init_logging(&config)?;

    // Task store setup
    let store = Arc::new(InMemoryStore::load_from_file(&config.store_file)?);
    let viewer = store.ensure_user(&config.viewer_email)?;
    info!(viewer = %viewer.id, store = %config.store_file.display(), "starting");

    let mut session = LiveTaskList::new(Arc::clone(&store), config.sync.clone());
    // The assignee list is a convenience; an outage is shown in the status line.
    let _ = session.refresh_users().await;
    session
        .set_view(viewer.id.clone(), config.sync.default_filter)
        .await;

    // Terminal setup
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = ui::run_app(&mut terminal, &mut session).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    session.close();
    store.save_to_file(&config.store_file)?;

    if let Err(err) = result {
        eprintln!("{:?}", err);
    }
    Ok(())
}

/// Logs go to a file; the terminal belongs to the UI.
fn init_logging(config: &AppConfig) -> io::Result<()> {
    let file = File::create(&config.log_file)?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("taskers_live=info")),
        )
        .with_writer(Arc::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}
