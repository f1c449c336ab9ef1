//! Row-oriented access to a parsed result set.
//!
//! A [`ResultSet`] is the raw outcome of one query round trip: column
//! descriptions, undecoded row values, and the command tag. The accessors
//! here apply a caller-supplied row decoder and enforce shape expectations
//! (no rows, exactly one row, and so on).

use bytes::Bytes;
use thiserror::Error;

use crate::error::BackendError;
use crate::protocol::backend::{ColumnDescription, CommandTag, TransactionStatus};

/// The raw result of one query round trip.
#[derive(Debug, Clone)]
pub struct ResultSet {
    pub columns: Vec<ColumnDescription>,
    /// Row values as sliced off the wire; `None` is SQL NULL.
    pub rows: Vec<Vec<Option<Bytes>>>,
    /// CommandComplete tag, absent for empty or suspended executions.
    pub tag: Option<CommandTag>,
    /// True when Execute's row limit was reached (PortalSuspended).
    pub suspended: bool,
    pub status: TransactionStatus,
}

impl ResultSet {
    /// Raw value of one cell, or `None` for SQL NULL.
    ///
    /// Panics are avoided: out-of-range indices return `None` as well;
    /// decoders that care use [`RowError::ColumnOutOfRange`].
    pub fn value(&self, row: usize, column: usize) -> Option<&Bytes> {
        self.rows.get(row)?.get(column)?.as_ref()
    }

    /// Wire format of a column (0 text, 1 binary), defaulting to text when
    /// the result carried no row description.
    pub fn column_format(&self, column: usize) -> i16 {
        self.columns.get(column).map(|c| c.format).unwrap_or(0)
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// Failure while decoding a single row.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RowError {
    #[error("column {0} out of range")]
    ColumnOutOfRange(usize),
    #[error("column {0} is unexpectedly null")]
    UnexpectedNull(usize),
    #[error("column {index}: {message}")]
    Decode { index: usize, message: String },
}

/// Failure of a result-set accessor.
#[derive(Debug, Error, Clone)]
pub enum ResultError {
    /// The result's shape did not match the accessor (e.g. rows where none
    /// were expected, or a missing command tag).
    #[error("unexpected result: {0}")]
    UnexpectedResult(String),
    #[error("unexpected amount of rows: {0}")]
    UnexpectedAmountOfRows(usize),
    #[error("row {index}: {source}")]
    Row { index: usize, source: RowError },
    #[error("server error: {0}")]
    Server(BackendError),
}

impl From<BackendError> for ResultError {
    fn from(err: BackendError) -> Self {
        ResultError::Server(err)
    }
}

/// Decode one row of a result set.
///
/// Implemented for closures of the shape
/// `Fn(&ResultSet, row_index, column_count, integer_datetimes) -> Result<T, RowError>`.
pub trait DecodeRow {
    type Output;

    fn decode_row(
        &self,
        set: &ResultSet,
        row: usize,
        columns: usize,
        integer_datetimes: bool,
    ) -> Result<Self::Output, RowError>;
}

impl<T, F> DecodeRow for F
where
    F: Fn(&ResultSet, usize, usize, bool) -> Result<T, RowError>,
{
    type Output = T;

    fn decode_row(
        &self,
        set: &ResultSet,
        row: usize,
        columns: usize,
        integer_datetimes: bool,
    ) -> Result<T, RowError> {
        self(set, row, columns, integer_datetimes)
    }
}

fn decode_at<D: DecodeRow>(
    set: &ResultSet,
    decoder: &D,
    row: usize,
    integer_datetimes: bool,
) -> Result<D::Output, ResultError> {
    decoder
        .decode_row(set, row, set.column_count(), integer_datetimes)
        .map_err(|source| ResultError::Row { index: row, source })
}

/// Expect a result with no rows.
pub fn unit(set: &ResultSet) -> Result<(), ResultError> {
    if set.rows.is_empty() {
        Ok(())
    } else {
        Err(ResultError::UnexpectedResult(format!(
            "expected no rows, got {}",
            set.rows.len()
        )))
    }
}

/// Rows affected, from the command tag.
pub fn rows_affected(set: &ResultSet) -> Result<u64, ResultError> {
    set.tag
        .as_ref()
        .and_then(CommandTag::rows_affected)
        .ok_or_else(|| {
            ResultError::UnexpectedResult("command tag carries no row count".into())
        })
}

/// Zero or one row.
pub fn maybe_one<D: DecodeRow>(
    set: &ResultSet,
    decoder: &D,
    integer_datetimes: bool,
) -> Result<Option<D::Output>, ResultError> {
    match set.rows.len() {
        0 => Ok(None),
        1 => decode_at(set, decoder, 0, integer_datetimes).map(Some),
        n => Err(ResultError::UnexpectedAmountOfRows(n)),
    }
}

/// Exactly one row.
pub fn exactly_one<D: DecodeRow>(
    set: &ResultSet,
    decoder: &D,
    integer_datetimes: bool,
) -> Result<D::Output, ResultError> {
    match set.rows.len() {
        1 => decode_at(set, decoder, 0, integer_datetimes),
        n => Err(ResultError::UnexpectedAmountOfRows(n)),
    }
}

/// All rows, in order.
pub fn vector<D: DecodeRow>(
    set: &ResultSet,
    decoder: &D,
    integer_datetimes: bool,
) -> Result<Vec<D::Output>, ResultError> {
    let mut out = Vec::with_capacity(set.rows.len());
    for row in 0..set.rows.len() {
        out.push(decode_at(set, decoder, row, integer_datetimes)?);
    }
    Ok(out)
}

/// Left fold over the rows in arrival order.
pub fn fold_left<D, A, F>(
    set: &ResultSet,
    decoder: &D,
    integer_datetimes: bool,
    init: A,
    mut step: F,
) -> Result<A, ResultError>
where
    D: DecodeRow,
    F: FnMut(A, D::Output) -> A,
{
    let mut acc = init;
    for row in 0..set.rows.len() {
        acc = step(acc, decode_at(set, decoder, row, integer_datetimes)?);
    }
    Ok(acc)
}

/// Right fold over the rows in reverse arrival order.
pub fn fold_right<D, A, F>(
    set: &ResultSet,
    decoder: &D,
    integer_datetimes: bool,
    init: A,
    mut step: F,
) -> Result<A, ResultError>
where
    D: DecodeRow,
    F: FnMut(D::Output, A) -> A,
{
    let mut acc = init;
    for row in (0..set.rows.len()).rev() {
        acc = step(decode_at(set, decoder, row, integer_datetimes)?, acc);
    }
    Ok(acc)
}
