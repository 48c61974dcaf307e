mod backend;
mod bindings;
mod config;
mod cursor;
mod focus;
mod frontend;
mod keyboard;
mod output;
mod pointer;
mod popup;
mod process;
mod protocols;
mod renderer;
mod scene;
mod seat;
mod server;
mod state;
mod surface;
#[cfg(test)]
mod testing;
mod window;

use std::error::Error;
use std::process::ExitCode;

use calloop::EventLoop;
use clap::{Arg, ArgAction, Command};
use kestrel_common::logging::FileLogger;
use wayland_server::{Display, ListeningSocket};

use backend::{Backend, LoopData};
use config::{Config, SOCKET_PREFIX};
use process::Launcher;
use state::State;

#[derive(Debug, PartialEq, Eq)]
enum Cli {
    Help,
    Run { startup: Option<String> },
}

fn usage(prog: &str) -> String {
    format!("Usage: {} [-s startup command]", prog)
}

fn cli_command() -> Command {
    Command::new("kestrel")
        .disable_help_flag(true)
        .disable_version_flag(true)
        .arg(Arg::new("startup").short('s').num_args(1).action(ArgAction::Set))
        .arg(Arg::new("help").short('h').action(ArgAction::SetTrue))
}

fn parse_args<I, T>(args: I) -> Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let matches = cli_command().try_get_matches_from(args)?;
    if matches.get_flag("help") {
        return Ok(Cli::Help);
    }
    Ok(Cli::Run {
        startup: matches.get_one::<String>("startup").cloned(),
    })
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let prog = args.first().map(String::as_str).unwrap_or("kestrel").to_string();

    let startup = match parse_args(&args) {
        Ok(Cli::Help) => {
            println!("{}", usage(&prog));
            return ExitCode::SUCCESS;
        }
        Ok(Cli::Run { startup }) => startup,
        Err(_) => {
            eprintln!("{}", usage(&prog));
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = FileLogger::init() {
        let _ = FileLogger::init_stderr();
        log::warn!("File logging unavailable: {}", e);
    }

    match run(startup) {
        Ok(()) => {
            log::info!("Compositor exited cleanly");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("Fatal: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(startup: Option<String>) -> Result<(), Box<dyn Error>> {
    let config = Config::load();
    let kind = config.backend_kind();

    let mut display = Display::<State>::new()?;
    let dh = display.handle();
    let state = State::new(dh.clone(), config);
    protocols::create_globals(&dh);

    let socket = ListeningSocket::bind_auto(SOCKET_PREFIX, 0..32)?;
    let socket_name = socket
        .socket_name()
        .ok_or("listening socket has no name")?
        .to_string_lossy()
        .into_owned();
    log::info!("[wayland] Listening on {}", socket_name);

    let mut event_loop = EventLoop::<LoopData>::try_new()?;
    let handle = event_loop.handle();
    backend::insert_wayland_sources(&handle, socket, &mut display)?;

    let mut data = LoopData { display, state };
    let mut backend = match Backend::start(kind, &handle, &mut data) {
        Ok(backend) => backend,
        Err(e) => {
            data.state.teardown();
            return Err(e);
        }
    };

    // The nested backend has connected to the host already.
    std::env::set_var("WAYLAND_DISPLAY", &socket_name);

    if let Some(command) = startup {
        data.state.server.launcher.spawn(&command);
    }

    log::info!("Compositor running on {}", socket_name);
    let result = backend.run(&mut event_loop, &mut data);

    data.state.teardown();
    data.flush();
    drop(backend);
    drop(event_loop);
    drop(data);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_startup_command() {
        assert_eq!(
            parse_args(["kestrel", "-s", "kitty --hold"]).unwrap(),
            Cli::Run { startup: Some("kitty --hold".to_string()) }
        );
        assert_eq!(parse_args(["kestrel"]).unwrap(), Cli::Run { startup: None });
    }

    #[test]
    fn test_parse_help() {
        assert_eq!(parse_args(["kestrel", "-h"]).unwrap(), Cli::Help);
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert!(parse_args(["kestrel", "-x"]).is_err());
        assert!(parse_args(["kestrel", "trailing"]).is_err());
        assert!(parse_args(["kestrel", "-s"]).is_err());
        assert!(parse_args(["kestrel", "--help"]).is_err());
    }

    #[test]
    fn test_usage_text() {
        assert_eq!(usage("/usr/bin/kestrel"), "Usage: /usr/bin/kestrel [-s startup command]");
    }
}
