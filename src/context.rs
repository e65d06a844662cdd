//! Main execution context.
//!
//! A [`MainContext`] stands for the host's single-threaded event loop. It
//! owns the worker pool jobs run on and the table of continuations waiting
//! for them. Workers never touch that table: they send [`Event`]s over a
//! channel and the host thread delivers them when it calls
//! [`MainContext::run_pending`] or [`MainContext::run_until_idle`].
//!
//! Progress events carry a reply channel. The worker blocks on it until the
//! host's progress callback has run, so progress is never buffered.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::{Rc, Weak};

use tokio::runtime::Runtime;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::config::{self, BindingConfig};
use crate::error::{BindError, Result};
use crate::lock;

pub(crate) type JobId = u64;

/// Host-side progress callback: `(fraction complete, message) -> continue`.
pub type ProgressCallback = Box<dyn FnMut(f64, &str) -> bool>;

type Finish = Box<dyn FnOnce(Box<dyn Any + Send>)>;

pub(crate) enum Event {
    Progress {
        job: JobId,
        complete: f64,
        message: String,
        reply: oneshot::Sender<bool>,
    },
    Done {
        job: JobId,
        outcome: Box<dyn Any + Send>,
    },
}

/// Worker-side end of a job's progress channel.
pub(crate) struct ProgressLink {
    job: JobId,
    tx: mpsc::UnboundedSender<Event>,
}

impl ProgressLink {
    /// Deliver one progress report and wait for the host's answer. A
    /// context that went away answers "continue".
    pub(crate) fn report(&self, complete: f64, message: &str) -> bool {
        let (reply, answer) = oneshot::channel();
        let event = Event::Progress {
            job: self.job,
            complete,
            message: message.to_string(),
            reply,
        };
        if self.tx.send(event).is_err() {
            return true;
        }
        answer.blocking_recv().unwrap_or(true)
    }
}

struct PendingJob {
    label: &'static str,
    finish: Finish,
    progress: Option<ProgressCallback>,
}

// Fields drop in declaration order: the receiver goes first so blocked
// progress reports resolve, then the runtime waits for running job bodies,
// then unfinished continuations release their persisted objects.
struct ContextInner {
    rx: RefCell<mpsc::UnboundedReceiver<Event>>,
    runtime: Runtime,
    tx: mpsc::UnboundedSender<Event>,
    pending: RefCell<HashMap<JobId, PendingJob>>,
    backlog: RefCell<VecDeque<Event>>,
    next_job: Cell<JobId>,
}

impl ContextInner {
    fn next_event(&self) -> Option<Event> {
        if let Some(event) = self.backlog.borrow_mut().pop_front() {
            return Some(event);
        }
        self.rx.borrow_mut().try_recv().ok()
    }

    fn dispatch(&self, event: Event) -> bool {
        match event {
            Event::Progress {
                job,
                complete,
                message,
                reply,
            } => {
                self.deliver_progress(job, complete, &message, reply);
                false
            }
            Event::Done { job, outcome } => {
                let Some(entry) = self.pending.borrow_mut().remove(&job) else {
                    warn!(job, "completion for unknown job");
                    return false;
                };
                debug!(job, label = entry.label, "running continuation");
                (entry.finish)(outcome);
                true
            }
        }
    }

    fn deliver_progress(
        &self,
        job: JobId,
        complete: f64,
        message: &str,
        reply: oneshot::Sender<bool>,
    ) {
        // The callback is taken out of the table while it runs so it may
        // submit or drive other jobs.
        let callback = self
            .pending
            .borrow_mut()
            .get_mut(&job)
            .and_then(|entry| entry.progress.take());
        let Some(mut callback) = callback else {
            let _ = reply.send(true);
            return;
        };
        let keep_going = callback(complete, message);
        if let Some(entry) = self.pending.borrow_mut().get_mut(&job) {
            entry.progress = Some(callback);
        }
        if !keep_going {
            debug!(job, "progress callback requested cancellation");
        }
        let _ = reply.send(keep_going);
    }

    /// Deliver queued progress reports; completions are kept for later.
    fn pump_progress(&self) {
        loop {
            let event = self.rx.borrow_mut().try_recv();
            match event {
                Ok(Event::Progress {
                    job,
                    complete,
                    message,
                    reply,
                }) => self.deliver_progress(job, complete, &message, reply),
                Ok(done) => self.backlog.borrow_mut().push_back(done),
                Err(_) => break,
            }
        }
    }
}

/// The host thread's event loop and worker pool.
pub struct MainContext {
    inner: Rc<ContextInner>,
    pump: lock::PumpKey,
}

impl MainContext {
    /// Context configured from the process configuration.
    pub fn new() -> Result<Self> {
        Self::with_config(config::current())
    }

    pub fn with_config(config: &BindingConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(config.worker_threads)
            .thread_name("geobind-worker")
            .build()
            .map_err(|e| BindError::internal(format!("cannot start worker pool: {e}")))?;
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Rc::new(ContextInner {
            rx: RefCell::new(rx),
            runtime,
            tx,
            pending: RefCell::new(HashMap::new()),
            backlog: RefCell::new(VecDeque::new()),
            next_job: Cell::new(0),
        });

        let weak: Weak<ContextInner> = Rc::downgrade(&inner);
        let pump: Rc<dyn Fn()> = Rc::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.pump_progress();
            }
        });
        let pump = lock::add_pump(pump, config.progress_poll());
        debug!(workers = config.worker_threads, "main context started");
        Ok(Self { inner, pump })
    }

    /// Run `work` on the worker pool and `finish` with its output on this
    /// context once it completes.
    pub(crate) fn submit<T, W, F>(
        &self,
        label: &'static str,
        work: W,
        progress: Option<ProgressCallback>,
        finish: F,
    ) where
        T: Send + 'static,
        W: FnOnce(Option<ProgressLink>) -> T + Send + 'static,
        F: FnOnce(T) + 'static,
    {
        let job = self.inner.next_job.get() + 1;
        self.inner.next_job.set(job);

        let link = progress.is_some().then(|| ProgressLink {
            job,
            tx: self.inner.tx.clone(),
        });
        let finish: Finish = Box::new(move |outcome: Box<dyn Any + Send>| {
            match outcome.downcast::<T>() {
                Ok(value) => finish(*value),
                Err(_) => warn!(job, label, "job outcome has unexpected type"),
            }
        });
        self.inner.pending.borrow_mut().insert(
            job,
            PendingJob {
                label,
                finish,
                progress,
            },
        );

        let tx = self.inner.tx.clone();
        self.inner.runtime.spawn_blocking(move || {
            let outcome = work(link);
            // A closed channel means the context is gone; nobody is left
            // to receive the outcome.
            let _ = tx.send(Event::Done {
                job,
                outcome: Box::new(outcome),
            });
        });
    }

    /// Deliver every event already queued without blocking. Returns the
    /// number of continuations run.
    pub fn run_pending(&self) -> usize {
        let mut finished = 0;
        while let Some(event) = self.inner.next_event() {
            if self.inner.dispatch(event) {
                finished += 1;
            }
        }
        finished
    }

    /// Block until every submitted job has run its continuation.
    pub fn run_until_idle(&self) -> usize {
        let mut finished = self.run_pending();
        while self.pending() > 0 {
            let event = match self.inner.next_event() {
                Some(event) => Some(event),
                None => self.inner.rx.borrow_mut().blocking_recv(),
            };
            let Some(event) = event else {
                break;
            };
            if self.inner.dispatch(event) {
                finished += 1;
            }
        }
        finished
    }

    /// Jobs submitted whose continuation has not run yet.
    pub fn pending(&self) -> usize {
        self.inner.pending.borrow().len()
    }
}

impl Drop for MainContext {
    fn drop(&mut self) {
        lock::remove_pump(self.pump);
        if self.pending() > 0 {
            debug!(pending = self.pending(), "main context dropped with jobs outstanding");
        }
    }
}
