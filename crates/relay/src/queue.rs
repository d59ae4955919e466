use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use log::{debug, error, info, warn};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use crate::config::RelayConfig;
use crate::error::{JobError, JobResult};
use crate::inspector::{OutputKind, StreamInspector};
use crate::job::{Job, JobEntry, JobId, JobPhase, JobSnapshot, Ticket};
use crate::pipeline::build_transform_plan;
use crate::probe::MetadataProbe;
use crate::progress::ProgressChannel;
use crate::replay::ReplayBuffer;
use crate::sink::{collect_payload, ByteProgress, Payload, Sink};
use crate::source::{FetchedSource, SourceFetcher};
use crate::status::{self, StatusReply, Submitter};
use crate::tracker::ProgressTracker;
use crate::transcoder::{TransformHandle, Transformer};

/// The external collaborators a job runs through
#[derive(Clone)]
pub struct Collaborators {
    pub fetcher: Arc<dyn SourceFetcher>,
    pub probe: Arc<dyn MetadataProbe>,
    pub transformer: Arc<dyn Transformer>,
    pub sink: Arc<dyn Sink>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Canceled(JobId),
    NothingToCancel,
}

struct QueueInner {
    entries: Mutex<VecDeque<JobEntry>>,
    wake: Notify,
    collaborators: Collaborators,
    inspector: StreamInspector,
    config: RelayConfig,
}

/// The head job as seen by the worker
struct ActiveJob {
    job: Job,
    tracker: ProgressTracker,
    cancel: CancellationToken,
    deadline: Instant,
}

/// FIFO job queue serviced by a single worker.
///
/// Only the head entry runs; it is removed once it reaches a terminal phase.
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<QueueInner>,
}

impl JobQueue {
    pub fn new(config: RelayConfig, collaborators: Collaborators) -> Self {
        let inspector = StreamInspector::new(
            collaborators.probe.clone(),
            config.max_probe_bytes,
            config.probe_timeout(),
        );
        JobQueue {
            inner: Arc::new(QueueInner {
                entries: Mutex::new(VecDeque::new()),
                wake: Notify::new(),
                collaborators,
                inspector,
                config,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<JobEntry>> {
        self.inner.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a request and acknowledge it on `reply`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn enqueue(
        &self,
        url: &str,
        kind: OutputKind,
        submitter: Submitter,
        reply: Arc<dyn StatusReply>,
    ) -> Ticket {
        let job = Job::new(url, kind, submitter);
        let id = job.id;
        let tracker = ProgressTracker::new(reply, self.inner.config.progress_update_interval());

        let (position, was_empty) = {
            let mut entries = self.lock();
            let was_empty = entries.is_empty();
            info!("Job {}: queued {} ({}) from {}", id, job.url, job.kind, job.submitter);
            if was_empty {
                tracker.show(status::PROCESS_START);
            }
            entries.push_back(JobEntry::new(job, tracker));
            refresh_positions(&mut entries);
            (entries.len() - 1, was_empty)
        };

        if was_empty {
            self.inner.wake.notify_one();
        }
        Ticket { id, position }
    }

    /// Cancel the active job, if any
    pub fn cancel_current(&self) -> CancelOutcome {
        let mut entries = self.lock();
        match entries.front_mut() {
            Some(entry) if !entry.job.phase.is_terminal() => {
                entry.job.canceled = true;
                entry.job.cancel.get_or_insert_with(CancellationToken::new).cancel();
                info!("Job {}: cancel requested", entry.job.id);
                CancelOutcome::Canceled(entry.job.id)
            }
            _ => CancelOutcome::NothingToCancel,
        }
    }

    /// Cancel `id` if it is the active job; waiting jobs are not cancelable
    pub fn cancel(&self, id: JobId) -> CancelOutcome {
        let is_head = self.lock().front().map(|e| e.job.id == id).unwrap_or(false);
        if is_head {
            self.cancel_current()
        } else {
            CancelOutcome::NothingToCancel
        }
    }

    /// Current queue contents, head first
    pub fn snapshot(&self) -> Vec<JobSnapshot> {
        self.lock()
            .iter()
            .enumerate()
            .map(|(i, entry)| JobSnapshot::of(&entry.job, i))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Spawn the worker on the current runtime
    pub fn spawn(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move { queue.run(shutdown).await })
    }

    /// Worker loop: service the head until `shutdown` fires.
    ///
    /// A shutdown during a job cancels that job and waits for it to wind down.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!("Job queue worker started");
        loop {
            if shutdown.is_cancelled() {
                break;
            }

            match self.begin_head() {
                Some(active) => self.run_active(active, &shutdown).await,
                None => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = self.inner.wake.notified() => debug!("Job queue worker woken"),
                    }
                }
            }
        }
        info!("Job queue worker stopped");
    }

    /// Attach a fresh token and deadline to the head entry
    fn begin_head(&self) -> Option<ActiveJob> {
        let mut entries = self.lock();
        let entry = entries.front_mut()?;

        let cancel = entry.job.cancel.get_or_insert_with(CancellationToken::new).clone();
        let deadline = *entry
            .job
            .deadline
            .get_or_insert_with(|| Instant::now() + self.inner.config.job_timeout());
        entry.job.phase = JobPhase::Fetching;

        if entry.shown_position != 0 {
            entry.shown_position = 0;
            entry.tracker.show(status::PROCESS_START);
        }

        Some(ActiveJob {
            job: entry.job.clone(),
            tracker: entry.tracker.clone(),
            cancel,
            deadline,
        })
    }

    async fn run_active(&self, active: ActiveJob, shutdown: &CancellationToken) {
        let ActiveJob { job, tracker, cancel, deadline } = active;
        info!("Starting job {}: {}", job.id, job.url);

        let work = self.process_job(&job, &tracker, &cancel);
        tokio::pin!(work);

        let result = tokio::select! {
            res = &mut work => res,
            _ = tokio::time::sleep_until(deadline) => {
                warn!("Job {}: deadline reached, stopping", job.id);
                self.mark_timed_out(job.id);
                cancel.cancel();
                if let Err(e) = work.await {
                    debug!("Job {}: stopped with {}", job.id, e);
                }
                Err(JobError::TimedOut)
            }
            _ = shutdown.cancelled() => {
                warn!("Job {}: shutting down, canceling", job.id);
                self.cancel_current();
                work.await
            }
        };

        // A user cancel wins over the deadline
        let result = if self.head_canceled(job.id) { Err(JobError::Canceled) } else { result };
        let (phase, text) = match result {
            Ok(done_text) => {
                info!("✅ Job {} completed successfully", job.id);
                (JobPhase::Done, done_text)
            }
            Err(JobError::Canceled) => {
                info!("Job {}: canceled", job.id);
                (JobPhase::Canceled, status::CANCELED.to_string())
            }
            Err(JobError::TimedOut) => (JobPhase::TimedOut, status::TIMED_OUT.to_string()),
            Err(e) => {
                error!("❌ Job {} failed: {}", job.id, e);
                (JobPhase::Failed, format!("{}: {}", status::ERROR, e))
            }
        };

        self.set_phase(job.id, phase);
        tracker.finish(&text).await;
        self.remove_head(job.id);
    }

    /// Run one job from download to delivery; returns the final status text
    async fn process_job(
        &self,
        job: &Job,
        tracker: &ProgressTracker,
        cancel: &CancellationToken,
    ) -> JobResult<String> {
        let collab = &self.inner.collaborators;
        let config = &self.inner.config;

        let FetchedSource { title, stream } = collab.fetcher.fetch(&job.url, cancel).await?;

        self.set_phase(job.id, JobPhase::Probing);
        tracker.show(status::PROBING);
        let mut source = ReplayBuffer::new(stream);
        let profile = self.inner.inspector.inspect(&mut source, job.kind, cancel).await?;

        let info = status::source_info(&profile);
        info!("Job {}: {}", job.id, info);
        tracker.set_source_info(&info);
        tracker.show(status::PREPARING);

        let plan = build_transform_plan(&profile, job.kind);

        self.set_phase(job.id, JobPhase::Converting);
        tracker.begin_phase(status::CONVERTING);
        let progress = ProgressChannel::attach(&config.socket_dir(), profile.duration, tracker.percent_callback());

        // A failed collect must stop the transform without marking the job canceled
        let transform_cancel = cancel.child_token();
        let TransformHandle { mut output, completion } =
            collab
                .transformer
                .start(&plan, Box::new(source), progress, transform_cancel.clone())?;

        let collect_cancel = cancel.clone();
        let max_bytes = config.max_upload_bytes;
        let collect = async move {
            let res = collect_payload(&mut output, max_bytes, &collect_cancel).await;
            if res.is_err() {
                transform_cancel.cancel();
            }
            res
        };
        let (collected, finished) = tokio::join!(collect, completion.wait());
        let data = match (collected, finished) {
            (Err(e), _) => return Err(e),
            (Ok(_), Err(e)) => return Err(e),
            (Ok(data), Ok(())) => data,
        };
        if data.is_empty() {
            return Err(JobError::Conversion("transform produced no output".to_string()));
        }

        let size = status::payload_size(data.len() as u64);
        info!("Job {}: converted, {} to deliver", job.id, size);
        tracker.set_size(&size);

        self.set_phase(job.id, JobPhase::Uploading);
        tracker.begin_phase(status::UPLOADING);
        let payload = Payload::new(data, &title, plan.file_extension, job.kind);

        let upload_tracker = tracker.clone();
        let on_bytes: ByteProgress = Arc::new(move |sent: u64, total: u64| {
            let percent = if total == 0 { 100 } else { (sent.min(total) * 100 / total) as i32 };
            upload_tracker.update(percent);
        });
        collab.sink.deliver(&payload, on_bytes, cancel).await?;

        Ok(status::progress_text(status::DONE, 100, Some(&size), &info))
    }

    fn set_phase(&self, id: JobId, phase: JobPhase) {
        let mut entries = self.lock();
        if let Some(entry) = entries.front_mut().filter(|e| e.job.id == id) {
            entry.job.phase = phase;
        }
    }

    fn mark_timed_out(&self, id: JobId) {
        let mut entries = self.lock();
        if let Some(entry) = entries.front_mut().filter(|e| e.job.id == id) {
            entry.job.timed_out = true;
        }
    }

    fn head_canceled(&self, id: JobId) -> bool {
        self.lock()
            .front()
            .filter(|e| e.job.id == id)
            .map(|e| e.job.canceled)
            .unwrap_or(false)
    }

    fn remove_head(&self, id: JobId) {
        let mut entries = self.lock();
        if entries.front().map(|e| e.job.id == id).unwrap_or(false) {
            entries.pop_front();
        } else {
            warn!("Job {}: no longer at the head of the queue", id);
        }
        refresh_positions(&mut entries);
        debug!("{} job(s) left in queue", entries.len());
    }
}

/// Push the 1-based waiting position to every waiting entry whose position changed
fn refresh_positions(entries: &mut VecDeque<JobEntry>) {
    for (pos, entry) in entries.iter_mut().enumerate().skip(1) {
        if entry.shown_position != pos {
            entry.shown_position = pos;
            entry.tracker.show(&status::queue_position(pos));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UploadError;
    use crate::probe::{FFProbeData, FFProbeFormat, FFProbeStream};
    use crate::tracker::tests::RecordingReply;
    use crate::transcoder::{TransformCompletion, TransformInput};
    use crate::pipeline::TransformPlan;
    use async_trait::async_trait;
    use std::io::Cursor;
    use std::time::Duration;
    use tokio::io::{AsyncRead, AsyncReadExt};
    use tokio::sync::Semaphore;

    const SOURCE_BYTES: &[u8] = b"0123456789abcdef";

    /// Fetcher that waits for a permit per job; `hang` URLs wait for cancellation instead
    struct GatedFetcher {
        gate: Semaphore,
        fetched: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SourceFetcher for GatedFetcher {
        async fn fetch(&self, url: &str, cancel: &CancellationToken) -> JobResult<FetchedSource> {
            self.fetched.lock().unwrap().push(url.to_string());
            if url.contains("hang") {
                cancel.cancelled().await;
                // A killed downloader reports its own failure
                return Err(JobError::Download("process killed".to_string()));
            }
            let permit = tokio::select! {
                _ = cancel.cancelled() => return Err(JobError::Canceled),
                permit = self.gate.acquire() => permit,
            };
            permit.map_err(|e| JobError::Download(e.to_string()))?.forget();
            Ok(FetchedSource {
                title: format!("title of {}", url),
                stream: Box::new(Cursor::new(SOURCE_BYTES.to_vec())),
            })
        }
    }

    struct FakeProbe;

    #[async_trait]
    impl MetadataProbe for FakeProbe {
        async fn probe(
            &self,
            prefix: &mut (dyn AsyncRead + Unpin + Send),
            _timeout: Duration,
            _cancel: &CancellationToken,
        ) -> JobResult<FFProbeData> {
            let mut head = [0u8; 4];
            prefix
                .read_exact(&mut head)
                .await
                .map_err(|e| JobError::Probe(e.to_string()))?;
            if &head == b"bad!" {
                return Err(JobError::Probe("Invalid data found when processing input".to_string()));
            }
            Ok(FFProbeData {
                streams: vec![
                    FFProbeStream { index: Some(0), codec_type: Some("video".to_string()), codec_name: Some("h264".to_string()) },
                    FFProbeStream { index: Some(1), codec_type: Some("audio".to_string()), codec_name: Some("aac".to_string()) },
                ],
                format: FFProbeFormat { format_name: Some("mp4".to_string()), duration: None },
            })
        }
    }

    /// Transformer that passes its input through unchanged
    struct PassthroughTransformer;

    impl Transformer for PassthroughTransformer {
        fn start(
            &self,
            _plan: &TransformPlan,
            input: TransformInput,
            progress: Option<ProgressChannel>,
            _cancel: CancellationToken,
        ) -> JobResult<TransformHandle> {
            drop(progress);
            Ok(TransformHandle {
                output: input,
                completion: TransformCompletion::new(tokio::spawn(async { Ok(()) })),
            })
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        delivered: Mutex<Vec<Payload>>,
    }

    #[async_trait]
    impl Sink for RecordingSink {
        async fn deliver(
            &self,
            payload: &Payload,
            progress: ByteProgress,
            _cancel: &CancellationToken,
        ) -> JobResult<()> {
            let total = payload.len();
            progress(total / 2, total);
            progress(total, total);
            self.delivered.lock().unwrap().push(payload.clone());
            Ok(())
        }
    }

    struct Harness {
        queue: JobQueue,
        fetcher: Arc<GatedFetcher>,
        sink: Arc<RecordingSink>,
    }

    fn harness(config: RelayConfig, permits: usize) -> Harness {
        let fetcher = Arc::new(GatedFetcher { gate: Semaphore::new(permits), fetched: Mutex::new(Vec::new()) });
        let sink = Arc::new(RecordingSink::default());
        let queue = JobQueue::new(
            config,
            Collaborators {
                fetcher: fetcher.clone(),
                probe: Arc::new(FakeProbe),
                transformer: Arc::new(PassthroughTransformer),
                sink: sink.clone(),
            },
        );
        Harness { queue, fetcher, sink }
    }

    fn user(id: i64) -> Submitter {
        Submitter::User { user_id: id, username: None }
    }

    fn submit(queue: &JobQueue, url: &str) -> (Ticket, Arc<RecordingReply>) {
        let reply = Arc::new(RecordingReply::default());
        let ticket = queue.enqueue(url, OutputKind::Video, user(1), reply.clone());
        (ticket, reply)
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    async fn wait_until_empty(queue: &JobQueue) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while !queue.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_fifo_order_and_positions() {
        let h = harness(RelayConfig::default(), 0);
        let shutdown = CancellationToken::new();

        let (a, ra) = submit(&h.queue, "https://example.com/a");
        let (b, rb) = submit(&h.queue, "https://example.com/b");
        let (c, rc) = submit(&h.queue, "https://example.com/c");
        assert_eq!((a.position, b.position, c.position), (0, 1, 2));

        let worker = h.queue.spawn(shutdown.clone());
        settle().await;
        let positions: Vec<usize> = h.queue.snapshot().iter().map(|s| s.position).collect();
        assert_eq!(positions, vec![0, 1, 2]);

        h.fetcher.gate.add_permits(3);
        wait_until_empty(&h.queue).await;

        let fetched = h.fetcher.fetched.lock().unwrap().clone();
        assert_eq!(fetched, vec!["https://example.com/a", "https://example.com/b", "https://example.com/c"]);

        let delivered = h.sink.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 3);
        assert_eq!(delivered[0].data.as_ref(), SOURCE_BYTES);
        assert_eq!(delivered[0].filename, "title of https   example.com a.mp4");

        assert_eq!(ra.edits()[0], status::PROCESS_START);
        assert!(ra.edits().last().unwrap().starts_with(status::DONE));

        let b_edits = rb.edits();
        assert_eq!(b_edits[0], status::queue_position(1));
        assert_eq!(b_edits[1], status::PROCESS_START);

        let c_edits = rc.edits();
        assert_eq!(c_edits[0], status::queue_position(2));
        assert_eq!(c_edits[1], status::queue_position(1));
        assert_eq!(c_edits[2], status::PROCESS_START);
        let done = c_edits.last().unwrap();
        assert!(done.starts_with(status::DONE) && done.contains("100%"), "{}", done);

        shutdown.cancel();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_on_empty_queue_does_nothing() {
        let h = harness(RelayConfig::default(), 0);
        assert_eq!(h.queue.cancel_current(), CancelOutcome::NothingToCancel);
        assert!(h.queue.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_waiting_job_is_not_cancelable() {
        let h = harness(RelayConfig::default(), 0);
        let (_a, _) = submit(&h.queue, "https://example.com/a");
        let (b, _) = submit(&h.queue, "https://example.com/b");

        assert_eq!(h.queue.cancel(b.id), CancelOutcome::NothingToCancel);
        let snap = h.queue.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[1].phase, JobPhase::Queued);
    }

    #[tokio::test]
    async fn test_canceled_head_reports_canceled_not_error() {
        let h = harness(RelayConfig::default(), 1);
        let shutdown = CancellationToken::new();
        let worker = h.queue.spawn(shutdown.clone());

        let (a, ra) = submit(&h.queue, "https://example.com/hang");
        let (_b, rb) = submit(&h.queue, "https://example.com/b");
        settle().await;

        assert_eq!(h.queue.cancel(a.id), CancelOutcome::Canceled(a.id));
        wait_until_empty(&h.queue).await;

        assert_eq!(ra.edits().last().map(String::as_str), Some(status::CANCELED));
        assert!(rb.edits().last().unwrap().starts_with(status::DONE));

        shutdown.cancel();
        worker.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_reports_timed_out() {
        let config = RelayConfig { job_timeout_secs: 1, ..RelayConfig::default() };
        let h = harness(config, 0);
        let shutdown = CancellationToken::new();
        let worker = h.queue.spawn(shutdown.clone());

        let (_a, ra) = submit(&h.queue, "https://example.com/hang");
        wait_until_empty(&h.queue).await;

        assert_eq!(ra.edits().last().map(String::as_str), Some(status::TIMED_OUT));

        shutdown.cancel();
        worker.await.unwrap();
    }

    /// Reply whose terminal edit waits until released
    struct HeldFinalReply {
        release: Semaphore,
        edits: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl StatusReply for HeldFinalReply {
        async fn edit(&self, text: &str) {
            if text.starts_with(status::DONE) {
                let _ = self.release.acquire().await;
            }
            self.edits.lock().unwrap().push(text.to_string());
        }
    }

    #[tokio::test]
    async fn test_finished_head_is_not_cancelable_while_reporting() {
        let h = harness(RelayConfig::default(), 1);
        let shutdown = CancellationToken::new();
        let worker = h.queue.spawn(shutdown.clone());

        let reply = Arc::new(HeldFinalReply { release: Semaphore::new(0), edits: Mutex::new(Vec::new()) });
        let ticket = h.queue.enqueue("https://example.com/a", OutputKind::Video, user(1), reply.clone());

        tokio::time::timeout(Duration::from_secs(10), async {
            while h.queue.snapshot().first().map(|s| s.phase) != Some(JobPhase::Done) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(h.queue.cancel_current(), CancelOutcome::NothingToCancel);
        assert_eq!(h.queue.cancel(ticket.id), CancelOutcome::NothingToCancel);

        reply.release.add_permits(1);
        wait_until_empty(&h.queue).await;
        let edits = reply.edits.lock().unwrap().clone();
        assert!(edits.last().unwrap().starts_with(status::DONE), "{:?}", edits);

        shutdown.cancel();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_worker_continues_after_failure() {
        struct BadFirstFetcher(GatedFetcher);

        #[async_trait]
        impl SourceFetcher for BadFirstFetcher {
            async fn fetch(&self, url: &str, cancel: &CancellationToken) -> JobResult<FetchedSource> {
                let fetched = self.0.fetch(url, cancel).await?;
                if url.ends_with("/bad") {
                    return Ok(FetchedSource { title: fetched.title, stream: Box::new(Cursor::new(b"bad!data".to_vec())) });
                }
                Ok(fetched)
            }
        }

        let sink = Arc::new(RecordingSink::default());
        let queue = JobQueue::new(
            RelayConfig::default(),
            Collaborators {
                fetcher: Arc::new(BadFirstFetcher(GatedFetcher { gate: Semaphore::new(2), fetched: Mutex::new(Vec::new()) })),
                probe: Arc::new(FakeProbe),
                transformer: Arc::new(PassthroughTransformer),
                sink: sink.clone(),
            },
        );
        let shutdown = CancellationToken::new();
        let worker = queue.spawn(shutdown.clone());

        let (_a, ra) = submit(&queue, "https://example.com/bad");
        let (_b, rb) = submit(&queue, "https://example.com/good");
        wait_until_empty(&queue).await;

        let failed = ra.edits().last().unwrap().clone();
        assert!(failed.starts_with("❌ Error: probe failed"), "{}", failed);
        assert!(rb.edits().last().unwrap().starts_with(status::DONE));
        assert_eq!(sink.delivered.lock().unwrap().len(), 1);

        shutdown.cancel();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_payload_over_limit_fails_before_delivery() {
        let config = RelayConfig { max_upload_bytes: 8, ..RelayConfig::default() };
        let h = harness(config, 1);
        let shutdown = CancellationToken::new();
        let worker = h.queue.spawn(shutdown.clone());

        let (_a, ra) = submit(&h.queue, "https://example.com/a");
        wait_until_empty(&h.queue).await;

        let expected = format!(
            "{}: {}",
            status::ERROR,
            JobError::from(UploadError::TooLarge { limit: status::payload_size(8) })
        );
        assert_eq!(ra.edits().last(), Some(&expected));
        assert!(h.sink.delivered.lock().unwrap().is_empty());

        shutdown.cancel();
        worker.await.unwrap();
    }
}
