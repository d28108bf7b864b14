mod app;
mod icmp;
mod ip;

use std::process;

use app::{PingApp, PingResult};
use crossterm::style::Stylize;
use env_logger::Env;

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();

    if let Err(err) = run() {
        eprintln!("{} {}", "Error:".red(), err);
        process::exit(1);
    }
}

// The app, and with it the socket, is dropped before `main` exits.
fn run() -> PingResult<()> {
    let mut app = PingApp::from_args()?;
    app.run()
}
