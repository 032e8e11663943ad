use core::fmt;

use fastrace::Span;

use crate::common::{QueryStatus, SpanAttribute};

/// Records the error message from a [`Result`] in the given span.
pub fn record_error<T, E>(span: &Span, result: &Result<T, E>)
where
    E: fmt::Display,
{
    if let Err(e) = result {
        span.add_property(|| (SpanAttribute::EXCEPTION_MESSAGE, e.to_string()));
    }
}

/// Records whether the operation succeeded, along with the error message if it failed.
pub fn record_status<T, E>(span: &Span, result: &Result<T, E>)
where
    E: fmt::Display,
{
    let status = match result {
        Ok(_) => QueryStatus::SUCCEEDED,
        Err(_) => QueryStatus::FAILED,
    };
    span.add_property(|| (SpanAttribute::QUERY_STATUS, status));
    record_error(span, result);
}
