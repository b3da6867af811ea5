//! Key layout inside one adapter scope.

pub const TASK: &str = "task";
pub const SETTINGS: &str = "settings";
pub const FINISHED: &str = "finished";
pub const COMPLETION_LOGGED: &str = "completion_logged";

pub const PROGRESS_PREFIX: &str = "progress:";
pub const PROGRESS_SUCCEEDED: &str = "progress:succeeded";
pub const PROGRESS_FAILED: &str = "progress:failed";
pub const PROGRESS_SKIPPED: &str = "progress:skipped";
pub const PROGRESS_TOTAL: &str = "progress:total";

// Lives outside the entry prefix so a log reset keeps sequence numbers growing.
pub const LOG_SEQ: &str = "logseq";
pub const LOG_ENTRY_PREFIX: &str = "log:";

pub const QUEUE_SEQ: &str = "queueseq";
pub const QUEUE_JOB_PREFIX: &str = "queue:job:";
pub const QUEUE_RUNNING: &str = "queue:running";
pub const QUEUE_CANCEL: &str = "queue:cancel";

pub const ID_MAP_PREFIX: &str = "idmap:";

pub fn log_entry(seq: u64) -> String {
    format!("{LOG_ENTRY_PREFIX}{seq:020}")
}

pub fn queue_job(seq: u64) -> String {
    format!("{QUEUE_JOB_PREFIX}{seq:020}")
}

pub fn id_map_prefix(entity: &str) -> String {
    format!("{ID_MAP_PREFIX}{entity}:")
}

pub fn id_map(entity: &str, source_id: &str) -> String {
    format!("{ID_MAP_PREFIX}{entity}:{source_id}")
}
