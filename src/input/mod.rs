//! Module reading source files into raw, untyped batches. Full materialization for small sources,
//! bounded batches for sources too large to hold in memory.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::domain::RawTable;
use crate::error::{Error, invalid_setting};

#[cfg(test)]
mod tests;

/// Reads the whole CSV file at `path` into memory.
pub fn read_full(path: &Path) -> Result<RawTable, Error> {
    let file = File::open(path)?;
    let mut reader = csv_reader(file);
    let columns = headers(&mut reader)?;
    let rows = reader.into_records().collect::<Result<Vec<_>, _>>()?;
    Ok(RawTable::new(columns, rows))
}

/// Streams a CSV source as consecutive batches of at most `batch_size` rows, in input order.
pub struct BatchReader<R: Read> {
    records: csv::StringRecordsIntoIter<R>,
    columns: Vec<String>,
    batch_size: usize,
    done: bool,
}

impl BatchReader<File> {
    pub fn open(path: &Path, batch_size: usize) -> Result<Self, Error> {
        Self::new(File::open(path)?, batch_size)
    }
}

impl<R: Read> BatchReader<R> {
    pub fn new(reader: R, batch_size: usize) -> Result<Self, Error> {
        if batch_size == 0 {
            return Err(invalid_setting("chunk size must be positive"));
        }
        let mut reader = csv_reader(reader);
        let columns = headers(&mut reader)?;
        Ok(Self {
            records: reader.into_records(),
            columns,
            batch_size,
            done: false,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

impl<R: Read> fmt::Debug for BatchReader<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchReader")
            .field("columns", &self.columns)
            .field("batch_size", &self.batch_size)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl<R: Read> Iterator for BatchReader<R> {
    type Item = Result<RawTable, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut rows = Vec::with_capacity(self.batch_size);
        for result in self.records.by_ref() {
            match result {
                Ok(record) => rows.push(record),
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            }
            if rows.len() == self.batch_size {
                return Some(Ok(RawTable::new(self.columns.clone(), rows)));
            }
        }
        self.done = true;
        if rows.is_empty() {
            None
        } else {
            Some(Ok(RawTable::new(self.columns.clone(), rows)))
        }
    }
}

fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(reader)
}

fn headers<R: Read>(reader: &mut csv::Reader<R>) -> Result<Vec<String>, Error> {
    Ok(reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect())
}
