use std::io;
use std::thread;
use tacho_core::StopFlag;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, info};

/// Route SIGINT and SIGTERM to the stop flag.
///
/// Handlers are installed before this returns, so a signal arriving while
/// workers start is not lost. The listener thread runs until the process
/// exits.
pub fn spawn_signal_listener(stop: StopFlag) -> io::Result<thread::JoinHandle<()>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let (mut interrupt, mut terminate) = runtime.block_on(async {
        Ok::<_, io::Error>((
            signal(SignalKind::interrupt())?,
            signal(SignalKind::terminate())?,
        ))
    })?;

    thread::Builder::new()
        .name("tacho-signals".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                loop {
                    let name = tokio::select! {
                        _ = interrupt.recv() => "SIGINT",
                        _ = terminate.recv() => "SIGTERM",
                    };
                    if stop.trigger() {
                        info!(signal = name, "stopping");
                    } else {
                        debug!(signal = name, "already stopping");
                    }
                }
            })
        })
}
