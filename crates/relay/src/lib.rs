pub mod config;
pub mod error;
pub mod inspector;
pub mod job;
pub mod pipeline;
pub mod probe;
pub mod progress;
pub mod queue;
pub mod replay;
pub mod request;
pub mod sink;
pub mod source;
pub mod status;
pub mod tools;
pub mod tracker;
pub mod transcoder;

pub use config::RelayConfig;
pub use error::{JobError, JobResult, RequestError, UploadError, ValidationError};
pub use inspector::{MediaProfile, OutputKind, StreamInspector};
pub use job::{Job, JobId, JobPhase, JobSnapshot, Ticket};
pub use pipeline::{build_transform_plan, TransformPlan};
pub use probe::{FFProbeData, FFProbeFormat, FFProbeStream, FfprobeProbe, MetadataProbe};
pub use progress::ProgressChannel;
pub use queue::{CancelOutcome, Collaborators, JobQueue};
pub use replay::ReplayBuffer;
pub use request::{parse_command, parse_message, Command};
pub use sink::{DirectorySink, Payload, Sink};
pub use source::{SourceFetcher, YtDlpFetcher};
pub use status::{LogReply, StatusReply, Submitter};
pub use tracker::ProgressTracker;
pub use transcoder::{FfmpegTransformer, Transformer};
