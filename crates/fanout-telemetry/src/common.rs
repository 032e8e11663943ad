/// Common span attribute names.
pub struct SpanAttribute;

impl SpanAttribute {
    pub const EXCEPTION_MESSAGE: &'static str = "exception.message";
    pub const QUERY_INDEX: &'static str = "query.index";
    pub const QUERY_TEXT: &'static str = "query.text";
    pub const QUERY_STATUS: &'static str = "query.status";
    pub const QUERY_ROW_COUNT: &'static str = "query.row_count";
    pub const BATCH_SIZE: &'static str = "batch.size";
    pub const PARTITION: &'static str = "execution.partition";
    pub const PARTITION_ROW_COUNT: &'static str = "execution.partition.row_count";
}

/// The status values recorded for [`SpanAttribute::QUERY_STATUS`].
pub struct QueryStatus;

impl QueryStatus {
    pub const SUCCEEDED: &'static str = "succeeded";
    pub const FAILED: &'static str = "failed";
}
