//! Result emission: newline-delimited JSON count records.

use crate::error::ScanError;
use crate::scan::CountSink;
use crate::types::Labels;

use serde::Serialize;
use std::io::Write;

/// One output line. Field order is the emitted field order.
#[derive(Serialize)]
struct Line<'a> {
    metric: &'a Labels,
    value_count: u64,
}

/// Writes one JSON object per count record, newline-delimited, to the
/// wrapped writer.
#[derive(Debug)]
pub struct JsonLineEmitter<W: Write> {
    w: W,
}

impl<W: Write> JsonLineEmitter<W> {
    pub fn new(w: W) -> Self {
        Self { w }
    }

    pub fn into_inner(self) -> W {
        self.w
    }
}

impl<W: Write> CountSink for JsonLineEmitter<W> {
    fn emit(&mut self, labels: &Labels, value_count: u64) -> Result<(), ScanError> {
        serde_json::to_writer(
            &mut self.w,
            &Line {
                metric: labels,
                value_count,
            },
        )
        .map_err(|e| ScanError::Output(e.into()))?;
        self.w.write_all(b"\n").map_err(ScanError::Output)
    }
}
