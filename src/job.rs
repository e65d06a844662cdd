//! Jobs: native work off the main context.
//!
//! A [`Job`] bundles a `main` body that only sees plain data and native
//! pointers, the root resources it must lock, an optional progress callback,
//! the host objects to keep alive until it finishes, and an `rval` step that
//! turns the native result into a host value on the main context.
//!
//! ```text
//! Created -> Scheduled -> Running -> Completed -> Resolving -> Done
//!                                 \-> Failed -> ErrorReported
//! ```
//!
//! Each job ends exactly once: either `rval` runs and its value reaches the
//! caller, or the error of `main` does and `rval` never runs.

use std::any::Any;
use std::cell::RefCell;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::context::{MainContext, ProgressCallback, ProgressLink};
use crate::error::{BindError, Result};
use crate::lock::locks;
use crate::store::{ObjectId, object_store};

/// Lifecycle states of a job, as they appear in the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Created,
    Scheduled,
    Running,
    Completed,
    Resolving,
    Done,
    Failed,
    ErrorReported,
}

/// Progress sink handed to a job body.
pub struct Progress {
    sink: Sink,
}

enum Sink {
    Silent,
    Direct(RefCell<ProgressCallback>),
    Remote(ProgressLink),
}

impl Progress {
    fn silent() -> Self {
        Self { sink: Sink::Silent }
    }

    /// Report progress. Returns false if the callback asked to stop.
    pub fn report(&self, complete: f64, message: &str) -> bool {
        match &self.sink {
            Sink::Silent => true,
            Sink::Direct(callback) => (&mut **callback.borrow_mut())(complete, message),
            Sink::Remote(link) => link.report(complete, message),
        }
    }

    /// Whether anybody listens to the reports.
    pub fn is_attached(&self) -> bool {
        !matches!(self.sink, Sink::Silent)
    }
}

/// Host objects a job keeps alive until its continuation ran.
#[derive(Default)]
pub struct Persisted {
    objects: Vec<Box<dyn Any>>,
}

impl Persisted {
    /// First persisted object of type `U`.
    pub fn get<U: Any>(&self) -> Option<&U> {
        self.objects.iter().find_map(|o| o.downcast_ref::<U>())
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

type Main<T> = Box<dyn FnOnce(&Progress) -> Result<T> + Send>;
type Rval<T, R> = Box<dyn FnOnce(T, &Persisted) -> Result<R>>;

/// Completion callback of an asynchronous job.
pub type Callback<R> = Box<dyn FnOnce(Result<R>)>;

/// Deferred native work.
pub struct Job<T, R = T> {
    label: &'static str,
    resources: Vec<ObjectId>,
    main: Main<T>,
    progress: Option<ProgressCallback>,
    persist: Persisted,
    rval: Rval<T, R>,
}

impl<T: Send + 'static> Job<T, T> {
    pub fn new(
        label: &'static str,
        main: impl FnOnce(&Progress) -> Result<T> + Send + 'static,
    ) -> Self {
        Self {
            label,
            resources: Vec::new(),
            main: Box::new(main),
            progress: None,
            persist: Persisted::default(),
            rval: Box::new(|value, _| Ok(value)),
        }
    }
}

impl<T: Send + 'static, R: 'static> Job<T, R> {
    /// Serialise against other work on the root resource `id`.
    pub fn lock(mut self, id: ObjectId) -> Self {
        self.resources.push(id);
        self
    }

    pub fn lock_all(mut self, ids: impl IntoIterator<Item = ObjectId>) -> Self {
        self.resources.extend(ids);
        self
    }

    /// Keep `object` alive until the job finished; `rval` can read it back.
    pub fn persist(mut self, object: impl Any) -> Self {
        self.persist.objects.push(Box::new(object));
        self
    }

    pub fn progress(mut self, callback: impl FnMut(f64, &str) -> bool + 'static) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    /// Convert the native result on the main context.
    pub fn rval<R2>(self, rval: impl FnOnce(T, &Persisted) -> Result<R2> + 'static) -> Job<T, R2> {
        Job {
            label: self.label,
            resources: self.resources,
            main: self.main,
            progress: self.progress,
            persist: self.persist,
            rval: Box::new(rval),
        }
    }

    /// Run on the calling thread, still under the resource locks.
    pub fn run_sync(self) -> Result<R> {
        let Job {
            label,
            resources,
            main,
            progress,
            persist,
            rval,
        } = self;
        let progress = match progress {
            Some(callback) => Progress {
                sink: Sink::Direct(RefCell::new(callback)),
            },
            None => Progress::silent(),
        };
        let value = execute(label, &resources, main, &progress);
        resolve(label, value, rval, &persist)
    }

    /// Run on the worker pool; `callback` gets the outcome on `ctx`.
    pub fn run_async(self, ctx: &MainContext, callback: impl FnOnce(Result<R>) + 'static) {
        let Job {
            label,
            resources,
            main,
            progress,
            persist,
            rval,
        } = self;
        debug!(label, state = ?JobState::Scheduled, ?resources, "job");
        ctx.submit(
            label,
            move |link| {
                let progress = match link {
                    Some(link) => Progress {
                        sink: Sink::Remote(link),
                    },
                    None => Progress::silent(),
                };
                execute(label, &resources, main, &progress)
            },
            progress,
            move |value: Result<T>| callback(resolve(label, value, rval, &persist)),
        );
    }

    /// Run on the worker pool and return a promise of the outcome.
    pub fn run_promise(self, ctx: &MainContext) -> JobPromise<R> {
        let (tx, rx) = oneshot::channel();
        self.run_async(ctx, move |result| {
            let _ = tx.send(result);
        });
        JobPromise { rx }
    }

    /// Asynchronous with a callback, synchronous without one.
    ///
    /// Returns the value in synchronous mode and `None` in asynchronous
    /// mode.
    pub fn run(self, ctx: &MainContext, callback: Option<Callback<R>>) -> Result<Option<R>> {
        match callback {
            Some(callback) => {
                self.run_async(ctx, callback);
                Ok(None)
            }
            None => self.run_sync().map(Some),
        }
    }
}

/// Lock, re-check liveness, run the body.
fn execute<T>(
    label: &'static str,
    resources: &[ObjectId],
    main: Main<T>,
    progress: &Progress,
) -> Result<T> {
    let _guard = locks().acquire(resources)?;
    if let Some(id) = resources
        .iter()
        .copied()
        .find(|id| *id != 0 && !object_store().is_alive(*id))
    {
        debug!(label, id, "resource destroyed while the job was queued");
        return Err(BindError::ObjectDestroyed("resource"));
    }
    debug!(label, state = ?JobState::Running, "job");
    match catch_unwind(AssertUnwindSafe(|| main(progress))) {
        Ok(value) => value,
        Err(panic) => {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(BindError::internal(format!("job {label} panicked: {msg}")))
        }
    }
}

fn resolve<T, R>(
    label: &'static str,
    value: Result<T>,
    rval: Rval<T, R>,
    persist: &Persisted,
) -> Result<R> {
    match value {
        Ok(value) => {
            debug!(label, state = ?JobState::Completed, "job");
            debug!(label, state = ?JobState::Resolving, "job");
            let result = rval(value, persist);
            match &result {
                Ok(_) => debug!(label, state = ?JobState::Done, "job"),
                Err(e) => warn!(label, error = %e, "job conversion failed"),
            }
            result
        }
        Err(e) => {
            warn!(label, state = ?JobState::Failed, error = %e, "job");
            debug!(label, state = ?JobState::ErrorReported, "job");
            Err(e)
        }
    }
}

/// Outcome of a job started with [`Job::run_promise`].
///
/// Resolves once the job's continuation ran on its main context, so the
/// context must be driven for it to make progress.
pub struct JobPromise<R> {
    rx: oneshot::Receiver<Result<R>>,
}

impl<R> JobPromise<R> {
    /// The outcome if the continuation already ran.
    pub fn try_take(&mut self) -> Option<Result<R>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(dropped())),
        }
    }
}

fn dropped() -> BindError {
    BindError::internal("job was dropped before completing")
}

impl<R> Future for JobPromise<R> {
    type Output = Result<R>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(dropped())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BindingConfig;
    use std::rc::Rc;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn context() -> MainContext {
        MainContext::with_config(&BindingConfig {
            worker_threads: 4,
            ..BindingConfig::default()
        })
        .unwrap()
    }

    struct Root {
        id: ObjectId,
    }

    fn root(addr: usize) -> Arc<Root> {
        let ptr = crate::native::NativePtr::from_raw(addr as *const u8);
        object_store().wrap(ptr, 0, |id| Root { id }).unwrap()
    }

    #[test]
    fn sync_mode_returns_converted_value() {
        let job = Job::new("double", |_| Ok(21)).rval(|v, _| Ok(v * 2));
        assert_eq!(job.run_sync(), Ok(42));
    }

    #[test]
    fn failing_main_skips_rval() {
        let ctx = context();
        let rval_ran = Rc::new(std::cell::Cell::new(false));
        let flag = rval_ran.clone();
        let outcome = Rc::new(RefCell::new(None));
        let out = outcome.clone();
        Job::new("fails", |_| -> Result<u8> { Err(BindError::Failed("disk on fire".into())) })
            .rval(move |v, _| {
                flag.set(true);
                Ok(v)
            })
            .run_async(&ctx, move |r| *out.borrow_mut() = Some(r));
        ctx.run_until_idle();
        assert_eq!(
            outcome.borrow_mut().take(),
            Some(Err(BindError::Failed("disk on fire".into())))
        );
        assert!(!rval_ran.get());
    }

    #[test]
    fn panic_in_main_is_an_internal_error() {
        let result = Job::new("panics", |_| -> Result<()> { panic!("bad pixel") }).run_sync();
        match result {
            Err(BindError::Internal(msg)) => assert!(msg.contains("bad pixel")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn persisted_objects_reach_rval() {
        let ctx = context();
        let mut promise = Job::new("persist", |_| Ok(1))
            .persist(String::from("kept"))
            .persist(7u32)
            .rval(|v, persisted| {
                Ok(format!("{}{}{}", persisted.get::<String>().unwrap(), v, persisted.get::<u32>().unwrap()))
            })
            .run_promise(&ctx);
        assert!(promise.try_take().is_none());
        ctx.run_until_idle();
        assert_eq!(promise.try_take(), Some(Ok("kept17".to_string())));
    }

    #[test]
    fn run_selects_mode_from_callback() {
        let ctx = context();
        assert_eq!(Job::new("sync", |_| Ok(5)).run(&ctx, None), Ok(Some(5)));
        let got = Rc::new(RefCell::new(None));
        let g = got.clone();
        let callback: Callback<i32> = Box::new(move |r| *g.borrow_mut() = Some(r));
        assert_eq!(Job::new("async", |_| Ok(6)).run(&ctx, Some(callback)), Ok(None));
        ctx.run_until_idle();
        assert_eq!(got.borrow_mut().take(), Some(Ok(6)));
    }

    #[test]
    fn progress_cancellation_reaches_main() {
        let ctx = context();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        let promise = Job::new("cancellable", |progress| {
            for step in 1..=4 {
                if !progress.report(step as f64 / 4.0, "working") {
                    return Err(BindError::Failed(format!("stopped at {step}")));
                }
            }
            Ok(())
        })
        .progress(move |complete, _| {
            s.borrow_mut().push(complete);
            complete < 0.5
        })
        .run_promise(&ctx);
        ctx.run_until_idle();
        let mut promise = promise;
        assert_eq!(
            promise.try_take(),
            Some(Err(BindError::Failed("stopped at 2".into())))
        );
        assert_eq!(*seen.borrow(), vec![0.25, 0.5]);
    }

    #[test]
    fn jobs_on_one_resource_never_overlap() {
        let ctx = context();
        let resource = root(0x7_0000);
        let spans = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for _ in 0..6 {
            let spans = spans.clone();
            Job::new("timed", move |_| {
                let start = Instant::now();
                std::thread::sleep(Duration::from_millis(5));
                spans.lock().push((start, Instant::now()));
                Ok(())
            })
            .lock(resource.id)
            .run_async(&ctx, |r| r.unwrap());
        }
        // A synchronous call racing the jobs takes the same lock.
        let sync_spans = spans.clone();
        Job::new("sync", move |_| {
            let start = Instant::now();
            std::thread::sleep(Duration::from_millis(5));
            sync_spans.lock().push((start, Instant::now()));
            Ok(())
        })
        .lock(resource.id)
        .run_sync()
        .unwrap();
        ctx.run_until_idle();

        let mut spans = spans.lock().clone();
        assert_eq!(spans.len(), 7);
        spans.sort();
        for pair in spans.windows(2) {
            assert!(pair[0].1 <= pair[1].0, "main phases overlap");
        }
    }

    #[test]
    fn lock_all_holds_every_root_while_main_runs() {
        use crate::lock::LockManager;

        let ctx = context();
        let (a, b) = (root(0x7_2000), root(0x7_3000));
        let (ida, idb) = (a.id, b.id);
        let spans = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let timed = |label: &'static str| {
            let spans = spans.clone();
            move |_: &Progress| {
                let start = Instant::now();
                std::thread::sleep(Duration::from_millis(5));
                spans.lock().push((start, Instant::now(), label));
                Ok(label)
            }
        };

        let results = Rc::new(RefCell::new(Vec::new()));
        let both = timed("both");
        let r = results.clone();
        Job::new("both", move |progress| {
            assert!(LockManager::held_by_current_thread(ida));
            assert!(LockManager::held_by_current_thread(idb));
            both(progress)
        })
        .lock_all([idb, ida, idb])
        .run_async(&ctx, move |v| r.borrow_mut().push(v.unwrap()));
        for (label, id) in [("a", ida), ("b", idb)] {
            let r = results.clone();
            Job::new(label, timed(label))
                .lock(id)
                .run_async(&ctx, move |v| r.borrow_mut().push(v.unwrap()));
        }
        // A synchronous caller spanning both roots queues behind the jobs.
        let sync_spans = spans.clone();
        locks()
            .with_locks(&[ida, idb], || {
                let start = Instant::now();
                std::thread::sleep(Duration::from_millis(5));
                sync_spans.lock().push((start, Instant::now(), "sync"));
            })
            .unwrap();
        assert_eq!(ctx.run_until_idle(), 3);

        let mut got = results.borrow().clone();
        got.sort();
        assert_eq!(got, vec!["a", "b", "both"]);
        let spans = spans.lock().clone();
        let span = |label| spans.iter().find(|s| s.2 == label).copied().unwrap();
        for multi in ["both", "sync"] {
            let (start, end, _) = span(multi);
            for other in spans.iter().filter(|s| s.2 != multi) {
                assert!(end <= other.0 || other.1 <= start, "{multi} overlaps {}", other.2);
            }
        }

        object_store().dispose(idb);
        assert_eq!(
            Job::new("half gone", |_| Ok(())).lock_all([ida, idb]).run_sync(),
            Err(BindError::ObjectDestroyed("resource"))
        );
    }

    #[test]
    fn destroyed_resource_fails_queued_job() {
        let resource = root(0x7_1000);
        let id = resource.id;
        object_store().dispose(id);
        assert_eq!(
            Job::new("late", |_| Ok(())).lock(id).run_sync(),
            Err(BindError::ObjectDestroyed("resource"))
        );
    }

    #[test]
    fn sync_progress_is_direct() {
        let calls = Rc::new(std::cell::Cell::new(0));
        let c = calls.clone();
        Job::new("direct", |progress| {
            assert!(progress.is_attached());
            progress.report(1.0, "done");
            Ok(())
        })
        .progress(move |_, _| {
            c.set(c.get() + 1);
            true
        })
        .run_sync()
        .unwrap();
        assert_eq!(calls.get(), 1);
    }
}
