use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use buxtehude_peer::{initialise, Server, ServerConfig, DEFAULT_PORT};
use tracing::info;

use crate::cmd::ServeArgs;
use crate::exit::{listen_error, CliError, CliResult, INTERNAL, SUCCESS};

pub fn run(args: ServeArgs) -> CliResult<i32> {
    initialise();

    let mut config = ServerConfig::default();
    if let Some(max) = args.max_msg_length {
        config.max_msg_length = max;
    }
    let server = Server::with_config(config);

    if let Some(path) = &args.local {
        server
            .listen_local(path)
            .map_err(|err| listen_error("local listen failed", err))?;
    }
    if let Some(port) = args.tcp {
        server
            .listen_tcp(port)
            .map_err(|err| listen_error("tcp listen failed", err))?;
    }
    if args.local.is_none() && args.tcp.is_none() {
        server
            .listen_tcp(DEFAULT_PORT)
            .map_err(|err| listen_error("tcp listen failed", err))?;
    }

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    info!("broker running; press ctrl-c to stop");
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }

    server.close();
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
