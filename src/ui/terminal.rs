use {
    crate::aggregate::GuildAggregate,
    ratatui::{backend::CrosstermBackend, Terminal},
    std::{sync::Arc, time::Duration},
    tokio::sync::watch,
};

/// Run the live dashboard until the fleet finishes or the user presses q/Esc
///
/// Reads the aggregate through lock-free snapshots, so redraws never slow the
/// shards down.
pub async fn run_ui(
    aggregate: Arc<GuildAggregate>,
    finished: watch::Receiver<bool>,
    refresh_interval: Duration,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Setup terminal
    let stdout = std::io::stdout();
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    crossterm::terminal::enable_raw_mode()?;

    // Alternate screen keeps the final summary on a clean terminal
    crossterm::execute!(
        std::io::stdout(),
        crossterm::terminal::EnterAlternateScreen,
        crossterm::cursor::Hide
    )?;
    terminal.clear()?;

    let result = draw_loop(&mut terminal, &aggregate, &finished, refresh_interval).await;

    // Cleanup - restore terminal state even if drawing failed
    crossterm::execute!(
        std::io::stdout(),
        crossterm::terminal::LeaveAlternateScreen,
        crossterm::cursor::Show
    )?;
    crossterm::terminal::disable_raw_mode()?;
    result
}

async fn draw_loop(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    aggregate: &GuildAggregate,
    finished: &watch::Receiver<bool>,
    refresh_interval: Duration,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    loop {
        let snapshot = aggregate.snapshot();
        terminal.draw(|f| {
            let area = f.size();
            crate::ui::layout::render_layout(f, area, &snapshot);
        })?;

        if *finished.borrow() {
            break;
        }

        // Poll keyboard off the async workers
        let quit = tokio::task::spawn_blocking(move || poll_quit(refresh_interval)).await??;
        if quit {
            log::info!("Dashboard closed; still waiting for shards");
            break;
        }
    }
    Ok(())
}

fn poll_quit(timeout: Duration) -> std::io::Result<bool> {
    if crossterm::event::poll(timeout)? {
        if let crossterm::event::Event::Key(key) = crossterm::event::read()? {
            return Ok(matches!(
                key.code,
                crossterm::event::KeyCode::Char('q') | crossterm::event::KeyCode::Esc
            ));
        }
    }
    Ok(false)
}
