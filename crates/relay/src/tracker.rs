use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use log::debug;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use crate::progress::PercentCallback;
use crate::status::{progress_text, StatusReply};

enum RenderMsg {
    Render(String),
    Close,
}

/// Mutable per-job progress state, guarded by one mutex
struct ProgressState {
    label: String,
    percent: i32,
    size: Option<String>,
    source_info: String,
    last_render_at: Option<Instant>,
    pending: Option<JoinHandle<()>>,
    /// Bumped whenever a deferred render is scheduled or dropped
    generation: u64,
    disabled: bool,
}

impl ProgressState {
    fn drop_pending(&mut self) {
        self.generation += 1;
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
    }
}

struct TrackerInner {
    state: Mutex<ProgressState>,
    tx: mpsc::UnboundedSender<RenderMsg>,
    interval: Duration,
}

impl TrackerInner {
    fn lock(&self) -> MutexGuard<'_, ProgressState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Send the current state's text; caller holds the lock
    fn render_locked(&self, state: &mut ProgressState) {
        let text = progress_text(&state.label, state.percent, state.size.as_deref(), &state.source_info);
        self.send_locked(state, text);
    }

    fn send_locked(&self, state: &mut ProgressState, text: String) {
        state.last_render_at = Some(Instant::now());
        if self.tx.send(RenderMsg::Render(text)).is_err() {
            debug!("  status render task already gone");
        }
    }

    /// Body of a deferred render. Aborting the task cannot stop one already
    /// waiting on the lock, so a stale generation renders nothing.
    fn render_deferred(&self, generation: u64) {
        let mut state = self.lock();
        if state.disabled || state.generation != generation {
            return;
        }
        state.pending = None;
        self.render_locked(&mut state);
    }
}

/// Throttled, deduplicated status renderer for one job.
///
/// All edits of the job's reply go through a single ordered render task, so
/// the synchronous entry points never wait on the status channel. At most one
/// percent update is rendered per interval; a newer update arriving inside
/// the window replaces the deferred one. `-1` and `100` render immediately.
/// After [`ProgressTracker::finish`] nothing renders again.
#[derive(Clone)]
pub struct ProgressTracker {
    inner: Arc<TrackerInner>,
    render_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ProgressTracker {
    /// Create a tracker; must be called from within a tokio runtime
    pub fn new(reply: Arc<dyn StatusReply>, interval: Duration) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let render_task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                match msg {
                    RenderMsg::Render(text) => reply.edit(&text).await,
                    RenderMsg::Close => break,
                }
            }
        });

        ProgressTracker {
            inner: Arc::new(TrackerInner {
                state: Mutex::new(ProgressState {
                    label: String::new(),
                    percent: 0,
                    size: None,
                    source_info: String::new(),
                    last_render_at: None,
                    pending: None,
                    generation: 0,
                    disabled: false,
                }),
                tx,
                interval,
            }),
            render_task: Arc::new(Mutex::new(Some(render_task))),
        }
    }

    /// Render fixed text right away, dropping any deferred update
    pub fn show(&self, text: &str) {
        let mut state = self.inner.lock();
        if state.disabled {
            return;
        }
        state.drop_pending();
        self.inner.send_locked(&mut state, text.to_string());
    }

    /// Start a percent-reporting phase, resetting the percent to 0
    pub fn begin_phase(&self, label: &str) {
        let mut state = self.inner.lock();
        if state.disabled {
            return;
        }
        state.drop_pending();
        state.label = label.to_string();
        state.percent = 0;
        self.inner.render_locked(&mut state);
    }

    /// Attach the source codec summary shown under every progress line
    pub fn set_source_info(&self, info: &str) {
        self.inner.lock().source_info = info.to_string();
    }

    /// Attach the payload size annotation once known
    pub fn set_size(&self, size: &str) {
        self.inner.lock().size = Some(size.to_string());
    }

    /// Report a new percent for the current phase
    pub fn update(&self, percent: i32) {
        let mut state = self.inner.lock();
        if state.disabled || state.percent == percent {
            return;
        }
        state.percent = percent;
        state.drop_pending();

        if percent == -1 || percent == 100 {
            self.inner.render_locked(&mut state);
            return;
        }

        let now = Instant::now();
        match state.last_render_at {
            Some(last) if now.duration_since(last) < self.inner.interval => {
                let at = last + self.inner.interval;
                let generation = state.generation;
                let inner = self.inner.clone();
                state.pending = Some(tokio::spawn(async move {
                    tokio::time::sleep_until(at).await;
                    inner.render_deferred(generation);
                }));
            }
            _ => self.inner.render_locked(&mut state),
        }
    }

    /// Callback handed to the progress channel
    pub fn percent_callback(&self) -> PercentCallback {
        let tracker = self.clone();
        Arc::new(move |percent| tracker.update(percent))
    }

    /// Render the terminal text and stop all further updates.
    ///
    /// Idempotent; waits until every queued edit has been delivered.
    pub async fn finish(&self, final_text: &str) {
        {
            let mut state = self.inner.lock();
            if state.disabled {
                return;
            }
            state.disabled = true;
            state.drop_pending();
            self.inner.send_locked(&mut state, final_text.to_string());
            let _ = self.inner.tx.send(RenderMsg::Close);
        }

        let task = self.render_task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                debug!("  status render task ended abnormally: {}", e);
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.inner.lock().disabled
    }
}
