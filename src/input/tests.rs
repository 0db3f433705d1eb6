use claims::{assert_err, assert_matches, assert_ok};
use rstest::rstest;

use super::*;

fn batch_sizes(input: &str, batch_size: usize) -> Vec<usize> {
    BatchReader::new(input.as_bytes(), batch_size)
        .expect("header should parse")
        .map(|batch| batch.expect("batch should parse").len())
        .collect()
}

#[rstest]
#[case(1, vec![1, 1, 1, 1, 1])]
#[case(2, vec![2, 2, 1])]
#[case(5, vec![5])]
#[case(100, vec![5])]
fn batches_are_bounded_and_cover_all_rows(#[case] batch_size: usize, #[case] expected: Vec<usize>) {
    let input = "a,b\n1,x\n2,y\n3,z\n4,w\n5,v\n";

    assert_eq!(batch_sizes(input, batch_size), expected);
}

#[test]
fn batches_preserve_row_order() {
    let input = "a\n1\n2\n3\n4\n";

    let values: Vec<String> = BatchReader::new(input.as_bytes(), 3)
        .unwrap()
        .flat_map(|batch| {
            let batch = batch.unwrap();
            batch
                .rows()
                .iter()
                .map(|r| r[0].to_string())
                .collect::<Vec<_>>()
        })
        .collect();

    assert_eq!(values, ["1", "2", "3", "4"]);
}

#[test]
fn header_only_input_yields_no_batches() {
    let reader = assert_ok!(BatchReader::new("a,b\n".as_bytes(), 10));
    assert_eq!(reader.columns(), ["a", "b"]);
    assert_eq!(reader.count(), 0);
}

#[test]
fn zero_batch_size_is_rejected() {
    let result = BatchReader::new("a\n1\n".as_bytes(), 0);
    assert_matches!(result.err(), Some(Error::InvalidSetting(_)));
}

#[test]
fn reader_debug_shows_columns_and_batch_size() {
    let reader = BatchReader::new("a,b\n1,x\n".as_bytes(), 3).unwrap();

    let rendered = format!("{reader:?}");

    assert!(rendered.contains(r#"columns: ["a", "b"]"#), "{rendered}");
    assert!(rendered.contains("batch_size: 3"), "{rendered}");
}

#[test]
fn ragged_row_surfaces_as_csv_error_and_ends_the_stream() {
    let input = "a,b\n1,2\n3\n4,5\n";
    let mut reader = BatchReader::new(input.as_bytes(), 10).unwrap();

    let first = reader.next().unwrap();
    assert_matches!(first, Err(Error::Csv(_)));
    assert!(reader.next().is_none());
}

#[test]
fn header_names_are_trimmed() {
    let reader = BatchReader::new(" a , b\n1,2\n".as_bytes(), 10).unwrap();
    assert_eq!(reader.columns(), ["a", "b"]);
}

#[test]
fn read_full_materializes_every_row() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("source.csv");
    std::fs::write(&path, "Date,Open\n01/02/2020,1\n02/02/2020,2\n").unwrap();

    let table = assert_ok!(read_full(&path));
    assert_eq!(table.columns(), ["Date", "Open"]);
    assert_eq!(table.len(), 2);
    assert_eq!(table.column_index("Open"), Some(1));
}

#[test]
fn read_full_of_missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = read_full(&dir.path().join("nope.csv"));
    assert_err!(&result);
    assert_matches!(result, Err(Error::Io(_)));
}
