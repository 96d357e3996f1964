//! Batch reading of record payloads found by lookups.
//!
use std::io::{Read, Seek};

use ndarray::Array2;

use crate::{
    errors::{Error, Result},
    record::{RecordLocator, RecordRef},
};

pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

/// Opens source files by path
pub trait RecordStore {
    fn open(&self, path: &str) -> Result<Box<dyn ReadSeek + '_>>;
}

/// Decodes the payload of one record from an open source file
pub trait Decoder {
    fn decode(&self, file: &mut dyn ReadSeek, locator: &RecordLocator) -> Result<Array2<f32>>;
}

/// Read the payloads of several records.
///
/// Requests are grouped by file and sorted by offset so that each file is opened once and read
/// front to back. A file is closed as soon as its records have been read, whether or not they
/// decoded. Results are returned in request order.
///
pub fn read_records(
    store: &dyn RecordStore,
    decoder: &dyn Decoder,
    records: &[RecordRef],
) -> Vec<Result<Array2<f32>>> {
    let mut order: Vec<usize> = (0..records.len()).collect();
    order.sort_by(|a, b| {
        let (a, b) = (&records[*a], &records[*b]);
        a.path
            .cmp(&b.path)
            .then_with(|| a.locator.offset.cmp(&b.locator.offset))
    });

    let mut results: Vec<Option<Result<Array2<f32>>>> = records.iter().map(|_| None).collect();
    let mut start = 0;
    while start < order.len() {
        let path = &records[order[start]].path;
        let end = start
            + order[start..]
                .iter()
                .take_while(|i| records[**i].path == *path)
                .count();
        let batch = &order[start..end];

        match store.open(path) {
            Ok(mut file) => {
                for i in batch {
                    results[*i] = Some(decoder.decode(&mut *file, &records[*i].locator));
                }
            }
            Err(err) => {
                log::warn!("unable to open {path}: {err}");
                for i in batch {
                    results[*i] = Some(Err(Error::Decode(format!("unable to open {path}: {err}"))));
                }
            }
        }

        start = end;
    }

    results
        .into_iter()
        .map(|result| result.unwrap_or_else(|| Err(Error::Decode(String::from("not read")))))
        .collect()
}
