//! Streaming decoder for delimited catalog files.
//!
//! Wraps `csv_async` around any async byte reader and yields one
//! [`RawRecord`] per data row, forward-only and without ever buffering the
//! file. Column positions are resolved from the header row, so the file may
//! carry columns in any order (and extra columns are ignored).
//!
//! Failure semantics follow the pipeline contract: a malformed row yields a
//! non-terminal [`RowError`] and the cursor keeps going; a transport-level
//! read failure is terminal and poisons the rest of the stream.

use csv_async::{AsyncReader, AsyncReaderBuilder, ByteRecord};
use thiserror::Error;
use tokio::io::AsyncRead;

use crate::models::record::RawRecord;

/// Column names required in the header row.
pub const REQUIRED_COLUMNS: [&str; 4] = ["title", "description", "price", "count"];

/// Failure to open the stream at all (header row problems).
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("header row is missing required column `{0}`")]
    MissingColumn(&'static str),
    #[error("reading header row: {0}")]
    Header(#[source] csv_async::Error),
}

/// Per-row or terminal failure while iterating data rows.
#[derive(Debug, Error)]
pub enum RowError {
    #[error("row {line}: expected {expected} columns, found {found}")]
    Shape {
        line: u64,
        expected: usize,
        found: usize,
    },
    #[error("row {line}: column `{column}` is not valid UTF-8")]
    BadUtf8 { line: u64, column: &'static str },
    #[error("stream read failed: {0}")]
    Transport(#[source] csv_async::Error),
}

impl RowError {
    /// Terminal errors abort the whole file; the rest skip one row.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Positions of the required columns within the header row.
#[derive(Clone, Copy, Debug)]
struct ColumnIndices {
    title: usize,
    description: usize,
    price: usize,
    count: usize,
}

/// A forward-only cursor over the data rows of one delimited file.
#[derive(Debug)]
pub struct RecordStreamReader<R> {
    reader: AsyncReader<R>,
    header_len: usize,
    indices: ColumnIndices,
    // Reused across rows to avoid per-row allocation.
    record: ByteRecord,
    line: u64,
}

impl<R: AsyncRead + Unpin + Send> RecordStreamReader<R> {
    /// Read and resolve the header row, returning a cursor positioned at the
    /// first data row.
    pub async fn open(byte_reader: R) -> Result<Self, ReadError> {
        let mut reader = AsyncReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .create_reader(byte_reader);

        let headers = reader.headers().await.map_err(ReadError::Header)?.clone();
        let [title, description, price, count] = REQUIRED_COLUMNS.map(|name| {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or(ReadError::MissingColumn(name))
        });
        let indices = ColumnIndices {
            title: title?,
            description: description?,
            price: price?,
            count: count?,
        };

        Ok(Self {
            reader,
            header_len: headers.len(),
            indices,
            record: ByteRecord::new(),
            line: 1,
        })
    }

    /// Advance to the next data row.
    ///
    /// `Ok(None)` signals clean end-of-stream. A non-terminal `Err` describes
    /// one malformed row; calling again continues with the following row.
    pub async fn next_row(&mut self) -> Result<Option<RawRecord>, RowError> {
        match self.reader.read_byte_record(&mut self.record).await {
            Ok(false) => Ok(None),
            Ok(true) => {
                self.line += 1;
                if self.record.len() != self.header_len {
                    return Err(RowError::Shape {
                        line: self.line,
                        expected: self.header_len,
                        found: self.record.len(),
                    });
                }
                Ok(Some(RawRecord {
                    title: self.field(self.indices.title, "title")?,
                    description: self.field(self.indices.description, "description")?,
                    price: self.field(self.indices.price, "price")?,
                    count: self.field(self.indices.count, "count")?,
                }))
            }
            Err(err) => Err(RowError::Transport(err)),
        }
    }

    /// Line number of the most recently read row (header is line 1).
    pub fn line(&self) -> u64 {
        self.line
    }

    fn field(&self, index: usize, column: &'static str) -> Result<String, RowError> {
        let raw = self.record.get(index).ok_or(RowError::Shape {
            line: self.line,
            expected: self.header_len,
            found: self.record.len(),
        })?;
        std::str::from_utf8(raw)
            .map(|s| s.to_string())
            .map_err(|_| RowError::BadUtf8 {
                line: self.line,
                column,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn drain(input: &'static [u8]) -> (Vec<RawRecord>, Vec<RowError>) {
        let mut reader = RecordStreamReader::open(input).await.unwrap();
        let mut rows = Vec::new();
        let mut errors = Vec::new();
        loop {
            match reader.next_row().await {
                Ok(Some(row)) => rows.push(row),
                Ok(None) => break,
                Err(err) => {
                    assert!(!err.is_terminal(), "unexpected terminal error: {err}");
                    errors.push(err);
                }
            }
        }
        (rows, errors)
    }

    #[tokio::test]
    async fn yields_one_record_per_data_row() {
        let input: &[u8] = b"title,description,price,count\n\
            Widget,A small widget,9.99,100\n\
            Gadget,A shiny gadget,4.50,3\n";
        let (rows, errors) = drain(input).await;
        assert!(errors.is_empty());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].title, "Widget");
        assert_eq!(rows[0].price, "9.99");
        assert_eq!(rows[1].count, "3");
    }

    #[tokio::test]
    async fn malformed_rows_are_isolated() {
        let input: &[u8] = b"title,description,price,count\n\
            Before,ok,1.00,1\n\
            only-two-columns,oops\n\
            After,ok,2.00,2\n";
        let (rows, errors) = drain(input).await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].title, "Before");
        assert_eq!(rows[1].title, "After");
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors[0],
            RowError::Shape {
                line: 3,
                expected: 4,
                found: 2
            }
        ));
    }

    #[tokio::test]
    async fn invalid_utf8_skips_only_that_row() {
        let mut input = b"title,description,price,count\n".to_vec();
        input.extend_from_slice(b"Bad,\xff\xfe,1.00,1\n");
        input.extend_from_slice(b"Good,fine,2.00,2\n");
        let leaked: &'static [u8] = input.leak();
        let (rows, errors) = drain(leaked).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].title, "Good");
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors[0],
            RowError::BadUtf8 {
                column: "description",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn columns_may_appear_in_any_order() {
        let input: &[u8] = b"count,price,title,description\n\
            7,3.25,Widget,desc\n";
        let (rows, errors) = drain(input).await;
        assert!(errors.is_empty());
        assert_eq!(rows[0].title, "Widget");
        assert_eq!(rows[0].count, "7");
    }

    #[tokio::test]
    async fn missing_required_column_fails_open() {
        let input: &[u8] = b"title,description,price\nWidget,desc,1.00\n";
        let err = RecordStreamReader::open(input).await.unwrap_err();
        assert!(matches!(err, ReadError::MissingColumn("count")));
    }

    #[tokio::test]
    async fn empty_file_yields_no_rows() {
        let input: &[u8] = b"title,description,price,count\n";
        let (rows, errors) = drain(input).await;
        assert!(rows.is_empty());
        assert!(errors.is_empty());
    }
}
