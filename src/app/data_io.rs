use std::fs::File;
use std::io::{self, BufWriter, Write};

use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::{Map, Value};

use super::panel::RenderedRow;
use super::tabs::Tab;
use super::types::FileFormatArg;

/// One rendered page of a tab, as handed to an export sink.
pub struct Snapshot<'a> {
    pub tab: Tab,
    pub page: usize,
    pub refreshed_at: DateTime<Local>,
    pub columns: &'a [&'static str],
    pub rows: &'a [RenderedRow],
}

#[derive(Debug, Serialize)]
struct ExportRecord<'a> {
    refreshed_at: String,
    tab: &'static str,
    page: usize,
    key: Option<&'a str>,
    pending: bool,
    fields: Map<String, Value>,
}

fn export_records<'a>(snapshot: &'a Snapshot<'_>) -> impl Iterator<Item = ExportRecord<'a>> {
    let refreshed_at = snapshot.refreshed_at.to_rfc3339();
    snapshot
        .rows
        .iter()
        .filter(|row| !row.placeholder)
        .map(move |row| ExportRecord {
            refreshed_at: refreshed_at.clone(),
            tab: snapshot.tab.title(),
            page: snapshot.page,
            key: row.key.as_deref(),
            pending: row.pending,
            fields: snapshot
                .columns
                .iter()
                .zip(&row.cells)
                .map(|(column, cell)| (column.to_string(), Value::String(cell.clone())))
                .collect(),
        })
}

pub struct CsvSink<W: Write> {
    writer: csv::Writer<W>,
    header_written: bool,
}

impl<W: Write> CsvSink<W> {
    fn write_snapshot(&mut self, snapshot: &Snapshot<'_>) -> io::Result<usize> {
        if !self.header_written {
            let mut header = vec!["refreshed_at", "tab", "page", "key"];
            header.extend(snapshot.columns.iter().copied());
            self.writer.write_record(header)?;
            self.header_written = true;
        }
        let mut written = 0;
        for record in export_records(snapshot) {
            let mut line = vec![
                record.refreshed_at,
                record.tab.to_string(),
                record.page.to_string(),
                record.key.unwrap_or_default().to_string(),
            ];
            line.extend(record.fields.into_iter().map(|(_, value)| match value {
                Value::String(text) => text,
                other => other.to_string(),
            }));
            self.writer.write_record(line)?;
            written += 1;
        }
        Ok(written)
    }
}

pub struct JsonLinesSink<W: Write> {
    out: W,
}

impl<W: Write> JsonLinesSink<W> {
    fn write_snapshot(&mut self, snapshot: &Snapshot<'_>) -> io::Result<usize> {
        let mut written = 0;
        for record in export_records(snapshot) {
            serde_json::to_writer(&mut self.out, &record).map_err(io::Error::other)?;
            self.out.write_all(b"\n")?;
            written += 1;
        }
        Ok(written)
    }
}

pub enum OutputSink<W: Write> {
    Csv(CsvSink<W>),
    Json(JsonLinesSink<W>),
}

impl OutputSink<Box<dyn Write>> {
    /// Opens `path`, or stdout when it is `None` or `-`.
    pub fn open(path: Option<&str>, format: FileFormatArg) -> io::Result<Self> {
        let out: Box<dyn Write> = match path {
            None | Some("-") => Box::new(io::stdout().lock()),
            Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        };
        Ok(Self::new(out, format))
    }
}

impl<W: Write> OutputSink<W> {
    pub fn new(out: W, format: FileFormatArg) -> Self {
        match format {
            FileFormatArg::Csv => OutputSink::Csv(CsvSink {
                writer: csv::Writer::from_writer(out),
                header_written: false,
            }),
            FileFormatArg::Json => OutputSink::Json(JsonLinesSink { out }),
        }
    }

    /// Writes every non-placeholder row; returns how many were written.
    pub fn write_snapshot(&mut self, snapshot: &Snapshot<'_>) -> io::Result<usize> {
        match self {
            OutputSink::Csv(sink) => sink.write_snapshot(snapshot),
            OutputSink::Json(sink) => sink.write_snapshot(snapshot),
        }
    }

    pub fn flush(&mut self) -> io::Result<()> {
        match self {
            OutputSink::Csv(sink) => sink.writer.flush(),
            OutputSink::Json(sink) => sink.out.flush(),
        }
    }

    pub fn into_inner(self) -> io::Result<W> {
        match self {
            OutputSink::Csv(sink) => sink
                .writer
                .into_inner()
                .map_err(|err| io::Error::other(err.to_string())),
            OutputSink::Json(mut sink) => {
                sink.out.flush()?;
                Ok(sink.out)
            }
        }
    }
}
