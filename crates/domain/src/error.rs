/// Shared error type used across all TimeBridge crates.
///
/// Variants are grouped by origin: transport, validation, engine, and
/// persistence. The CLI maps every variant to a non-zero exit code; the
/// orchestrator records non-fatal variants into its `errors` channel and
/// keeps going.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    // ── Transport ────────────────────────────────────────────────────

    #[error("unauthorized (401): {0}")]
    Unauthorized(String),

    #[error("forbidden (403): {0}")]
    Forbidden(String),

    #[error("not found (404): {0}")]
    NotFound(String),

    #[error("rate limited (429): {0}")]
    RateLimited(String),

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("connection: {0}")]
    Connection(String),

    #[error("protocol: {0}")]
    Protocol(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    // ── Validation ───────────────────────────────────────────────────

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("out of range: {0}")]
    OutOfRange(String),

    #[error("missing field: {0}")]
    MissingField(String),

    // ── Engine ───────────────────────────────────────────────────────

    #[error("no work items: {0}")]
    NoWorkItems(String),

    #[error("no meetings: {0}")]
    NoMeetings(String),

    #[error("conflict unresolved for work item #{work_item_id}: {message}")]
    ConflictUnresolved { work_item_id: i64, message: String },

    #[error("write rejected for work item #{work_item_id}: {message}")]
    WriteRejected { work_item_id: i64, message: String },

    // ── Persistence (manual store) ───────────────────────────────────

    #[error("corrupt store: {0}")]
    CorruptStore(String),

    #[error("duplicate entry: {0}")]
    DuplicateEntry(String),

    // ── Ambient ──────────────────────────────────────────────────────

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Informational outcomes that an operator should see but that do not
    /// fail a run on their own.
    pub fn is_informational(&self) -> bool {
        matches!(self, Error::NoWorkItems(_) | Error::NoMeetings(_))
    }

    /// Whether this error makes an entire run unusable when it occurs in
    /// the first pipeline stage (auth/transport failures).
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(
            self,
            Error::Unauthorized(_)
                | Error::Forbidden(_)
                | Error::Auth(_)
                | Error::Connection(_)
                | Error::Cancelled(_)
        )
    }
}
