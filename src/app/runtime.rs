use std::fs::File;
use std::io;
use std::sync::Arc;

use chrono::Local;
use clap::Parser;
use crossterm::event::{DisableMouseCapture, EnableMouseCapture};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use env_logger::{Env, Target};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use tokio::sync::mpsc::{self, UnboundedReceiver};

use super::dashboard::{Dashboard, EventOutcome};
use super::data_io::{OutputSink, Snapshot};
use super::gateway::{HttpTransport, RequestGateway};
use super::tui::draw_loop;
use super::types::{Cli, DashEvent};

pub async fn run() -> io::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    let transport = HttpTransport::new(&cli.base_url, cli.timeout()).map_err(io::Error::other)?;
    let gateway = RequestGateway::new(Arc::new(transport), cli.auth());
    let (tx, mut rx) = mpsc::unbounded_channel::<DashEvent>();
    let mut dash = Dashboard::new(cli.settings(), cli.tab, gateway, tx);
    log::info!(
        "dashboard for {} starting on {}",
        cli.base_url,
        cli.tab.title()
    );
    dash.start();

    let result = if cli.no_tui {
        run_headless(&cli, &mut dash, &mut rx).await
    } else {
        run_tui(&mut dash, &mut rx)
    };
    dash.stop();
    result
}

/// Diagnostics never go to the terminal the UI draws on.
fn init_logging(cli: &Cli) -> io::Result<()> {
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("info"));
    if cli.no_tui {
        builder.target(Target::Stderr);
    } else if let Some(path) = &cli.log_file {
        builder.target(Target::Pipe(Box::new(File::create(path)?)));
    } else {
        return Ok(());
    }
    // A second init in the same process keeps the first logger.
    let _ = builder.try_init();
    Ok(())
}

async fn run_headless(
    cli: &Cli,
    dash: &mut Dashboard,
    rx: &mut UnboundedReceiver<DashEvent>,
) -> io::Result<()> {
    let mut sink = OutputSink::open(cli.output.as_deref(), cli.format)?;
    let mut refreshes = 0usize;
    let mut exported = 0usize;

    while let Some(event) = rx.recv().await {
        let EventOutcome::Rendered(tab) = dash.handle_event(event) else {
            continue;
        };
        if tab != dash.active_tab() {
            continue;
        }
        let Some(panel) = dash.panel(tab) else {
            continue;
        };
        let page = dash
            .pagination(tab)
            .map(|pagination| pagination.current_page())
            .unwrap_or(1);
        exported += sink.write_snapshot(&Snapshot {
            tab,
            page,
            refreshed_at: panel.last_refresh().unwrap_or_else(Local::now),
            columns: panel.template().columns,
            rows: panel.rows(),
        })?;
        sink.flush()?;
        refreshes += 1;
        if cli.max_refreshes.is_some_and(|max| refreshes >= max) {
            break;
        }
    }

    sink.flush()?;
    log::info!("stopped after {refreshes} refreshes, {exported} rows exported");
    Ok(())
}

fn run_tui(dash: &mut Dashboard, rx: &mut UnboundedReceiver<DashEvent>) -> io::Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;

    let tui_result = draw_loop(&mut terminal, dash, rx);

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    tui_result
}
