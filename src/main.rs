mod app_runtime;
mod backends;
mod cli;
mod config;
mod errors;
mod event_pump;
mod playlist_manager;
mod protocol;
mod wake_channel;

use clap::Parser;

use app_runtime::AppRuntime;
use cli::{Args, USAGE_HINT};
use errors::JukeboxError;

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            std::process::exit(JukeboxError::from(err).exit_code());
        }
    };

    let mut clog = colog::default_builder();
    clog.filter(None, args.log_level());
    clog.parse_env("RUST_LOG");
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    let result = AppRuntime::build(&args).and_then(AppRuntime::run);
    if let Err(err) = result {
        log::error!("{}", err);
        if matches!(err, JukeboxError::MissingArgument(_)) {
            eprintln!("{}", USAGE_HINT);
        }
        std::process::exit(err.exit_code());
    }
}
