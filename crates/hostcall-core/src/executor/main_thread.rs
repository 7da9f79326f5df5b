//! In-process main-thread executor.
//!
//! A multi-producer, single-consumer job queue. Producers ([`MainThreadQueue`])
//! live on network threads; the consumer ([`MainLoop`]) is driven by the
//! host's main thread. Every submission carries its own one-shot completion
//! channel, so a waiter is released exactly when its job has run, has
//! panicked, or has been dropped by a stopping loop.
//!
//! ```text
//! network thread                       main thread
//! --------------                       -----------
//! execute_sync(job) ──[job, done_tx]──▶ MainLoop::run / pump
//!    blocks on done_rx                   catch_unwind(job)
//!    ◀──────────────── Ok / Panicked ─── done_tx.send(..)
//! ```

use super::{ExecMode, ExecutorError, Job, MainThreadExecutor};
use crate::config::RpcConfig;
use crate::shutdown::ShutdownToken;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender, TryRecvError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;
use tracing::{debug, error, trace};

type Completion = SyncSender<Result<(), ExecutorError>>;

enum Message {
    Run {
        mode: ExecMode,
        job: Job,
        done: Completion,
    },
    Shutdown,
}

/// State shared by every queue handle and the loop.
///
/// `open` is only flipped under the lock, and producers only send while
/// holding it, so once the loop closes and drains, nothing can be left behind
/// in the channel.
struct Shared {
    main_thread: ThreadId,
    open: Mutex<bool>,
}

impl Shared {
    fn is_open(&self) -> bool {
        *self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Create a main-thread executor bound to the calling thread.
///
/// Must be called on the thread that will drive the returned [`MainLoop`].
pub fn channel() -> (MainThreadQueue, MainLoop) {
    let (tx, rx) = mpsc::channel();
    let shared = Arc::new(Shared {
        main_thread: thread::current().id(),
        open: Mutex::new(true),
    });

    let queue = MainThreadQueue {
        tx,
        shared: shared.clone(),
        wait_timeout: None,
    };
    let main_loop = MainLoop {
        rx,
        shared,
        stats: MainLoopStats::default(),
    };
    (queue, main_loop)
}

/// Producer handle; cheap to clone and safe to share across threads.
#[derive(Clone)]
pub struct MainThreadQueue {
    tx: Sender<Message>,
    shared: Arc<Shared>,
    wait_timeout: Option<Duration>,
}

impl MainThreadQueue {
    /// Bound how long `execute_sync` waits for completion.
    ///
    /// Without a bound a caller waits as long as the main thread takes. With
    /// one, an expired wait returns [`ExecutorError::Timeout`] but the job is
    /// not cancelled.
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }

    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout
    }

    pub fn main_thread_id(&self) -> ThreadId {
        self.shared.main_thread
    }

    pub fn is_main_thread(&self) -> bool {
        thread::current().id() == self.shared.main_thread
    }

    /// Whether the loop still accepts jobs.
    pub fn is_open(&self) -> bool {
        self.shared.is_open()
    }

    /// Ask the main loop to stop after the jobs already queued.
    pub fn shutdown(&self) {
        let open = self.shared.open.lock().unwrap_or_else(PoisonError::into_inner);
        if *open {
            let _ = self.tx.send(Message::Shutdown);
        }
    }

    fn submit(&self, message: Message) -> Result<(), ExecutorError> {
        let open = self.shared.open.lock().unwrap_or_else(PoisonError::into_inner);
        if !*open {
            return Err(ExecutorError::Unavailable);
        }
        self.tx.send(message).map_err(|_| ExecutorError::Unavailable)
    }
}

impl MainThreadExecutor for MainThreadQueue {
    fn execute_sync(&self, mode: ExecMode, job: Job) -> Result<(), ExecutorError> {
        // Re-entrant submission from a job already on the main thread would
        // wait on itself forever.
        if self.is_main_thread() {
            trace!("Running {} job inline on the main thread", mode);
            return run_job(job);
        }

        let (done_tx, done_rx) = mpsc::sync_channel(1);
        self.submit(Message::Run {
            mode,
            job,
            done: done_tx,
        })?;

        match self.wait_timeout {
            Some(timeout) => match done_rx.recv_timeout(timeout) {
                Ok(outcome) => outcome,
                Err(RecvTimeoutError::Timeout) => Err(ExecutorError::Timeout(timeout)),
                Err(RecvTimeoutError::Disconnected) => Err(ExecutorError::Abandoned),
            },
            None => done_rx.recv().unwrap_or(Err(ExecutorError::Abandoned)),
        }
    }
}

/// Counters kept by the main loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MainLoopStats {
    pub executed: u64,
    pub panicked: u64,
}

/// Consumer half, driven by the main thread.
pub struct MainLoop {
    rx: Receiver<Message>,
    shared: Arc<Shared>,
    stats: MainLoopStats,
}

impl MainLoop {
    /// Process jobs until shutdown is requested or every queue is dropped.
    pub fn run(&mut self) {
        debug!("Main loop running");
        while let Ok(message) = self.rx.recv() {
            if !self.handle(message) {
                break;
            }
        }
        self.close();
    }

    /// Like [`run`](Self::run), but also stops once `token` is triggered.
    pub fn run_until(&mut self, token: &ShutdownToken) {
        debug!("Main loop running until shutdown");
        while !token.is_triggered() {
            match self.rx.recv_timeout(RpcConfig::MAIN_LOOP_POLL_INTERVAL) {
                Ok(message) => {
                    if !self.handle(message) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.close();
    }

    /// Run every job already queued without blocking. Returns how many ran.
    ///
    /// For hosts that own their event loop and call in once per tick.
    pub fn pump(&mut self) -> usize {
        let mut ran = 0;
        loop {
            match self.rx.try_recv() {
                Ok(Message::Shutdown) => {
                    self.close();
                    break;
                }
                Ok(message) => {
                    self.handle(message);
                    ran += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        ran
    }

    pub fn stats(&self) -> MainLoopStats {
        self.stats
    }

    pub fn is_open(&self) -> bool {
        self.shared.is_open()
    }

    /// Returns `false` when the loop should stop.
    fn handle(&mut self, message: Message) -> bool {
        match message {
            Message::Run { mode, job, done } => {
                trace!("Running {} job on the main thread", mode);
                let outcome = run_job(job);
                self.stats.executed += 1;
                if let Err(ExecutorError::Panicked(msg)) = &outcome {
                    self.stats.panicked += 1;
                    error!("Main-thread job panicked: {}", msg);
                }
                // The waiter may have timed out and gone away.
                let _ = done.send(outcome);
                true
            }
            Message::Shutdown => false,
        }
    }

    /// Stop accepting work and release everyone still waiting.
    fn close(&mut self) {
        {
            let mut open = self.shared.open.lock().unwrap_or_else(PoisonError::into_inner);
            if !*open {
                return;
            }
            *open = false;
        }

        let mut dropped = 0;
        while let Ok(message) = self.rx.try_recv() {
            // Dropping the completion sender wakes the waiter with `Abandoned`.
            if let Message::Run { .. } = message {
                dropped += 1;
            }
        }
        debug!("Main loop stopped ({} queued jobs abandoned)", dropped);
    }
}

impl Drop for MainLoop {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_job(job: Job) -> Result<(), ExecutorError> {
    panic::catch_unwind(AssertUnwindSafe(job)).map_err(|payload| {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        ExecutorError::Panicked(message)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    /// Spawn a thread acting as the host main thread.
    fn spawn_main_loop() -> (MainThreadQueue, thread::JoinHandle<MainLoopStats>) {
        let (ready_tx, ready_rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            let (queue, mut main_loop) = channel();
            ready_tx.send(queue).unwrap();
            main_loop.run();
            main_loop.stats()
        });
        (ready_rx.recv().unwrap(), handle)
    }

    #[test]
    fn test_job_runs_on_main_thread() {
        let (queue, handle) = spawn_main_loop();
        let ran_on = Arc::new(Mutex::new(None));

        let slot = ran_on.clone();
        queue
            .execute_sync(
                ExecMode::Write,
                Box::new(move || {
                    *slot.lock().unwrap() = Some(thread::current().id());
                }),
            )
            .unwrap();

        assert_eq!(*ran_on.lock().unwrap(), Some(queue.main_thread_id()));
        assert_ne!(queue.main_thread_id(), thread::current().id());

        queue.shutdown();
        let stats = handle.join().unwrap();
        assert_eq!(stats.executed, 1);
    }

    #[test]
    fn test_panic_is_reported_not_hung() {
        let (queue, handle) = spawn_main_loop();

        let result = queue.execute_sync(ExecMode::Write, Box::new(|| panic!("boom")));
        assert_eq!(result, Err(ExecutorError::Panicked("boom".to_string())));

        // The loop survives the panic.
        assert!(queue.execute_sync(ExecMode::Read, Box::new(|| {})).is_ok());

        queue.shutdown();
        let stats = handle.join().unwrap();
        assert_eq!(stats.executed, 2);
        assert_eq!(stats.panicked, 1);
    }

    #[test]
    fn test_submit_after_shutdown_is_unavailable() {
        let (queue, handle) = spawn_main_loop();
        queue.shutdown();
        handle.join().unwrap();

        assert!(!queue.is_open());
        let result = queue.execute_sync(ExecMode::Write, Box::new(|| {}));
        assert_eq!(result, Err(ExecutorError::Unavailable));
    }

    #[test]
    fn test_stopped_loop_releases_queued_waiters() {
        let (queue, mut main_loop) = channel();
        let ran = Arc::new(AtomicUsize::new(0));

        // Shutdown is queued ahead of the job, so the job must never run.
        queue.shutdown();
        let waiter = {
            let queue = queue.clone();
            let ran = ran.clone();
            thread::spawn(move || {
                queue.execute_sync(
                    ExecMode::Write,
                    Box::new(move || {
                        ran.fetch_add(1, Ordering::SeqCst);
                    }),
                )
            })
        };
        thread::sleep(Duration::from_millis(50));
        main_loop.run();

        // Queued before the loop closed: abandoned. Otherwise: refused.
        let result = waiter.join().unwrap();
        assert!(matches!(
            result,
            Err(ExecutorError::Abandoned) | Err(ExecutorError::Unavailable)
        ));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_wait_timeout_expires() {
        let (queue, mut main_loop) = channel();
        let queue = queue.with_wait_timeout(Duration::from_millis(50));

        let waiter = {
            let queue = queue.clone();
            thread::spawn(move || queue.execute_sync(ExecMode::Write, Box::new(|| {})))
        };

        let result = waiter.join().unwrap();
        assert_eq!(result, Err(ExecutorError::Timeout(Duration::from_millis(50))));

        // No cancellation: the job still runs when the loop gets to it.
        assert_eq!(main_loop.pump(), 1);
    }

    #[test]
    fn test_reentrant_submit_runs_inline() {
        let (queue, handle) = spawn_main_loop();
        let inner_queue = queue.clone();
        let inner_ran = Arc::new(AtomicUsize::new(0));

        let counter = inner_ran.clone();
        queue
            .execute_sync(
                ExecMode::Write,
                Box::new(move || {
                    inner_queue
                        .execute_sync(
                            ExecMode::Write,
                            Box::new(move || {
                                counter.fetch_add(1, Ordering::SeqCst);
                            }),
                        )
                        .unwrap();
                }),
            )
            .unwrap();

        assert_eq!(inner_ran.load(Ordering::SeqCst), 1);
        queue.shutdown();
        handle.join().unwrap();
    }

    #[test]
    fn test_pump_runs_pending_jobs() {
        let (queue, mut main_loop) = channel();
        assert_eq!(main_loop.pump(), 0);

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let queue = queue.clone();
                thread::spawn(move || queue.execute_sync(ExecMode::Read, Box::new(|| {})))
            })
            .collect();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut ran = 0;
        while ran < 3 && Instant::now() < deadline {
            ran += main_loop.pump();
            thread::sleep(Duration::from_millis(5));
        }

        assert_eq!(ran, 3);
        for waiter in waiters {
            assert!(waiter.join().unwrap().is_ok());
        }
    }

    #[test]
    fn test_run_until_token() {
        let token = ShutdownToken::new();
        let loop_token = token.clone();
        let (ready_tx, ready_rx) = mpsc::channel();

        let handle = thread::spawn(move || {
            let (queue, mut main_loop) = channel();
            ready_tx.send(queue).unwrap();
            main_loop.run_until(&loop_token);
        });

        let queue = ready_rx.recv().unwrap();
        assert!(queue.execute_sync(ExecMode::Write, Box::new(|| {})).is_ok());

        token.trigger();
        handle.join().unwrap();
        assert!(!queue.is_open());
    }
}
