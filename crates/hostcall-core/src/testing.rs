//! Test helpers shared by the crate's unit tests.

use crate::executor::{channel, MainThreadQueue};
use std::sync::mpsc;
use std::thread;

/// A dedicated thread standing in for the host's main thread.
///
/// Dropping it stops the loop and joins the thread.
pub(crate) struct MainThread {
    pub queue: MainThreadQueue,
    join: Option<thread::JoinHandle<()>>,
}

impl MainThread {
    pub fn spawn() -> Self {
        let (ready_tx, ready_rx) = mpsc::channel();
        let join = thread::Builder::new()
            .name("host-main".to_string())
            .spawn(move || {
                let (queue, mut main_loop) = channel();
                ready_tx.send(queue).unwrap();
                main_loop.run();
            })
            .unwrap();

        Self {
            queue: ready_rx.recv().unwrap(),
            join: Some(join),
        }
    }
}

impl Drop for MainThread {
    fn drop(&mut self) {
        self.queue.shutdown();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}
