//! JSON-lines frame source.
//!
//! The detection pipeline writes one JSON object per captured frame:
//!
//! ```text
//! {"captured_at": "2024-03-04T09:05:00", "faces": [{"descriptor": [0.01, ...], "bbox": {"x": 10, "y": 20, "width": 64, "height": 64}}]}
//! ```
//!
//! `captured_at` is optional and defaults to the local time the line was read.

use chrono::{Local, NaiveDateTime};
use rollcall_core::{CaptureError, CaptureSource, FaceObservation, Frame};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

#[derive(Deserialize)]
struct FrameLine {
    #[serde(default)]
    captured_at: Option<NaiveDateTime>,
    #[serde(default)]
    faces: Vec<FaceObservation>,
}

pub struct JsonLinesSource<R> {
    reader: R,
    buf: String,
    line: usize,
    now: fn() -> NaiveDateTime,
}

fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

impl<R: BufRead> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: String::new(),
            line: 0,
            now: local_now,
        }
    }

    /// Override the clock used for lines without `captured_at`.
    pub fn with_clock(mut self, now: fn() -> NaiveDateTime) -> Self {
        self.now = now;
        self
    }
}

impl<R: BufRead> CaptureSource for JsonLinesSource<R> {
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        loop {
            self.buf.clear();
            match self.reader.read_line(&mut self.buf) {
                Ok(0) => return Ok(None),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, line = self.line + 1, "frame stream read failed; ending capture");
                    return Ok(None);
                }
            }
            self.line += 1;

            let text = self.buf.trim();
            if text.is_empty() {
                continue;
            }

            let parsed: FrameLine = serde_json::from_str(text).map_err(|source| {
                CaptureError::Malformed {
                    line: self.line,
                    source,
                }
            })?;

            return Ok(Some(Frame {
                captured_at: parsed.captured_at.unwrap_or_else(self.now),
                faces: parsed.faces,
            }));
        }
    }
}

/// Open the frame stream: `-` is stdin, anything else a file path.
pub fn open_frames(path: &str) -> std::io::Result<JsonLinesSource<Box<dyn BufRead + Send>>> {
    let reader: Box<dyn BufRead + Send> = if path == "-" {
        Box::new(BufReader::new(std::io::stdin()))
    } else {
        Box::new(BufReader::new(File::open(Path::new(path))?))
    };
    Ok(JsonLinesSource::new(reader))
}
