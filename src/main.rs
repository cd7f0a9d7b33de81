use anyhow::Result;

mod app;
mod bedrock;
mod config;
mod conversation;
mod handler;
mod tui;
mod ui;

use app::App;
use bedrock::BedrockClient;
use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Connection settings are resolved once and injected; the client is
    // constructed here and reused for every call.
    let config = Config::from_env();
    let client = BedrockClient::new(&config);

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = tui::EventHandler::new();
    let mut app = App::new(client);

    let result = run(&mut terminal, &mut events, &mut app).await;

    tui::restore()?;
    result
}

async fn run(terminal: &mut tui::Tui, events: &mut tui::EventHandler, app: &mut App) -> Result<()> {
    while !app.should_quit {
        terminal.draw(|frame| ui::render(app, frame))?;

        if let Some(event) = events.next().await {
            handler::handle_event(app, event);
        }

        // Reconcile a finished completion before the next draw
        app.poll_completion().await;
    }
    Ok(())
}
