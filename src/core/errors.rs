use super::agg::ReduceError;

/// Everything that can abort a BSP job. All variants are fatal to the run:
/// a lost or corrupt shard has no meaningful partial result, so the
/// coordinator halts the whole job rather than dropping it silently.
#[derive(thiserror::Error, Debug)]
pub enum ComputeError {
    /// Two records with one id were observed while loading or restoring a
    /// shard. Data corruption; never retried.
    #[error("duplicate vertex id {id} violates the one-record-per-id invariant")]
    DuplicateVertex { id: String },

    /// A compute call observed a message that could not have been produced
    /// by a correct barrier (impossible superstep or source). Indicates a
    /// routing or synchronization bug, never ignored.
    #[error("protocol violation in superstep {superstep}: {detail}")]
    ProtocolViolation { superstep: u64, detail: String },

    #[error("aggregator `{name}` is not registered")]
    UnknownAggregator { name: String },

    #[error("aggregator `{name}` rejected a value")]
    Aggregator {
        name: String,
        #[source]
        source: ReduceError,
    },

    /// Paging or stream I/O failed; surfaced after local retries exhaust.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] Box<bincode::ErrorKind>),

    #[error("results are not available until the job has halted")]
    NotHalted,
}
