//! Integration tests of the output writer.

use std::fs;

use etl_engine::{Cell, Error, Table, WriteMode, write_table};

fn batch(rows: &[(f64, &str)]) -> Table {
    Table::with_rows(
        vec!["amount".into(), "label".into()],
        rows.iter()
            .map(|(n, s)| vec![Cell::Number(*n), Cell::Text((*s).to_string())])
            .collect(),
    )
}

#[test]
fn two_batches_make_one_file_with_one_header() {
    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("out.csv");

    write_table(&batch(&[(1.0, "a"), (2.0, "b")]), &destination, WriteMode::Overwrite).unwrap();
    write_table(&batch(&[(3.5, "c")]), &destination, WriteMode::Append).unwrap();

    assert_eq!(
        fs::read_to_string(&destination).unwrap(),
        "amount,label\n1,a\n2,b\n3.5,c\n"
    );
}

#[test]
fn parquet_output_rejects_append() {
    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("out.parquet");
    write_table(&batch(&[(1.0, "a")]), &destination, WriteMode::Overwrite).unwrap();
    let before = fs::read(&destination).unwrap();

    let result = write_table(&batch(&[(2.0, "b")]), &destination, WriteMode::Append);

    assert!(matches!(result, Err(Error::UnsupportedAppend { .. })));
    assert_eq!(fs::read(&destination).unwrap(), before);
}
