//! Module writing processed tables to their destination files.
//!
//! Overwrites go through a temporary sibling file that is renamed over the destination, so a
//! reader never observes a half-written file and a crash before the rename leaves the previous
//! file untouched. Appends add a header-less batch to an existing CSV file.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow_array::{ArrayRef, Float64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use crate::domain::{Cell, Table};
use crate::error::Error;


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Overwrite,
    Append,
}

/// Output encodings, selected by the destination's file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Comma-separated, UTF-8, with a header row
    Csv,
    /// Columnar binary; overwrite only
    Parquet,
}

impl OutputFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("parquet") => OutputFormat::Parquet,
            _ => OutputFormat::Csv,
        }
    }
}

/// Writes `table` to `destination` and returns the path written.
///
/// `Append` against a destination that does not exist yet behaves like `Overwrite`.
/// Appending is not atomic: the batch is appended and synced in one write, and an I/O error
/// truncates the file back to its previous length, but a process crash in the middle of the
/// write can still leave a partial trailing batch.
pub fn write_table(table: &Table, destination: &Path, mode: WriteMode) -> Result<PathBuf, Error> {
    let format = OutputFormat::from_path(destination);
    match (format, mode) {
        (OutputFormat::Parquet, WriteMode::Append) => Err(Error::UnsupportedAppend {
            path: destination.to_path_buf(),
        }),
        (OutputFormat::Parquet, WriteMode::Overwrite) => {
            replace_with(destination, |file| write_parquet(table, file))?;
            Ok(destination.to_path_buf())
        }
        (OutputFormat::Csv, WriteMode::Append) if destination.exists() => {
            append_csv(table, destination)?;
            Ok(destination.to_path_buf())
        }
        (OutputFormat::Csv, _) => {
            replace_with(destination, |file| write_csv(table, file, true))?;
            Ok(destination.to_path_buf())
        }
    }
}

/// Replaces `destination` with whatever `write` puts into a fresh temporary file next to it.
/// If `write` fails, the temporary file is removed and `destination` is left as it was.
pub(crate) fn replace_with(
    destination: &Path,
    write: impl FnOnce(&File) -> Result<(), Error>,
) -> Result<(), Error> {
    let dir = parent_dir(destination);
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let prefix = format!(".{name}.");
    let mut builder = tempfile::Builder::new();
    builder.prefix(&prefix).suffix(".tmp");
    // created like a plain `File::create`, subject to the umask, instead of owner-only
    #[cfg(unix)]
    builder.permissions(std::os::unix::fs::PermissionsExt::from_mode(0o666));
    let tmp = builder.tempfile_in(dir)?;
    if let Ok(previous) = fs::metadata(destination) {
        tmp.as_file().set_permissions(previous.permissions())?;
    }

    write(tmp.as_file())?;
    tmp.as_file().sync_all()?;
    tmp.persist(destination).map_err(|e| e.error)?;
    sync_dir(dir)
}

/// Appends `table` without a header. On an I/O error the file is truncated back to its previous
/// length; a process crash mid-write can still leave a truncated trailing batch.
fn append_csv(table: &Table, destination: &Path) -> Result<(), Error> {
    let mut bytes = Vec::new();
    write_csv(table, &mut bytes, false)?;

    let mut file = OpenOptions::new().append(true).open(destination)?;
    append_or_roll_back(&mut file, &bytes, destination)
}

/// Target of an append that can be cut back to a previous length.
trait Truncate: Write {
    fn committed_len(&self) -> io::Result<u64>;
    fn truncate(&mut self, len: u64) -> io::Result<()>;
    fn sync(&mut self) -> io::Result<()>;
}

impl Truncate for File {
    fn committed_len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }
}

/// Writes `bytes` at the end of `target` and syncs it. On failure `target` is cut back to its
/// length before the call.
fn append_or_roll_back(target: &mut impl Truncate, bytes: &[u8], path: &Path) -> Result<(), Error> {
    let committed = target.committed_len()?;
    if let Err(err) = target.write_all(bytes).and_then(|()| target.sync()) {
        if let Err(rollback) = target.truncate(committed) {
            tracing::error!(
                path = %path.display(),
                "failed to roll back torn append: {rollback}"
            );
        }
        return Err(err.into());
    }
    Ok(())
}

fn write_csv(table: &Table, writer: impl Write, header: bool) -> Result<(), Error> {
    let mut wtr = csv::Writer::from_writer(writer);
    if header {
        wtr.write_record(table.columns())?;
    }
    for row in table.rows() {
        wtr.write_record(row.iter().map(Cell::to_string))?;
    }
    wtr.flush()?;
    Ok(())
}

/// Columns holding only numbers (or nothing) become `Float64`, everything else UTF-8 text.
fn write_parquet(table: &Table, file: &File) -> Result<(), Error> {
    let mut fields = Vec::with_capacity(table.columns().len());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(table.columns().len());

    for (index, name) in table.columns().iter().enumerate() {
        let numeric = table
            .column(index)
            .all(|cell| matches!(cell, Cell::Number(_) | Cell::Missing));
        if numeric {
            let values: Float64Array = table.column(index).map(Cell::as_number).collect();
            fields.push(Field::new(name, DataType::Float64, true));
            arrays.push(Arc::new(values));
        } else {
            let values: StringArray = table
                .column(index)
                .map(|cell| (!cell.is_missing()).then(|| cell.to_string()))
                .collect();
            fields.push(Field::new(name, DataType::Utf8, true));
            arrays.push(Arc::new(values));
        }
    }

    let schema = Arc::new(Schema::new(fields));
    let batch = RecordBatch::try_new(schema.clone(), arrays)?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(file, schema, Some(props))?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

fn parent_dir(path: &Path) -> &Path {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<(), Error> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<(), Error> {
    Ok(())
}
