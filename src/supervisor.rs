use log::{error, info};

use std::thread;

use crossbeam_channel::{bounded, unbounded, Receiver};

use crate::config::Config;
use crate::db::mysql::{connect_pool, MysqlStore};
use crate::prelude::*;
use crate::worker::Worker;

/// Spawns one worker thread per configured queue and blocks until either a
/// termination signal arrives or a worker fails. Shutdown is cooperative:
/// workers finish their in-flight delivery, then everything is joined.
pub fn run(config: Config) -> Result<()> {
    let pool = connect_pool(&config.db)?;
    let signals = signal_channel()?;
    let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
    let (done_tx, done_rx) = unbounded::<(String, Result<()>)>();

    let mut handles = Vec::with_capacity(config.queues.len());
    for queue in &config.queues {
        let queue = queue.clone();
        let config = config.clone();
        let shutdown = shutdown_rx.clone();
        let done = done_tx.clone();
        let store = MysqlStore::new(pool.clone());
        let handle = thread::Builder::new().name(queue.clone()).spawn(move || {
            let mut worker = Worker::new(queue.clone(), config, store);
            let result = worker.run(&shutdown);
            let _ = done.send((queue, result));
        })?;
        handles.push(handle);
    }
    drop(done_tx);
    drop(shutdown_rx);

    let mut open_workers = handles.len();
    let mut exit: Result<()> = Ok(());
    while open_workers > 0 {
        crossbeam_channel::select! {
            recv(signals) -> _ => {
                info!("termination signal received, closing workers");
                break;
            }
            recv(done_rx) -> message => match message {
                Ok((queue, Ok(()))) => {
                    info!("worker {} finished", queue);
                    open_workers -= 1;
                }
                Ok((queue, Err(err))) => {
                    error!("worker {} failed: {}", queue, err);
                    exit = Err(err);
                    break;
                }
                Err(_) => break,
            }
        }
    }

    drop(shutdown_tx);
    for handle in handles {
        let _ = handle.join();
    }
    exit
}

fn signal_channel() -> Result<Receiver<()>> {
    let (tx, rx) = bounded(1);
    ctrlc::set_handler(move || {
        let _ = tx.try_send(());
    })
    .map_err(|err| ImportError::Config(format!("installing signal handler: {}", err)))?;
    Ok(rx)
}
