// src/core/modules/storage.rs

//! Storage modules. `_stor_db` journals every stored event of a scan to disk
//! and is part of every scan; `_stor_stdout` echoes events for headless runs.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::debug;

use crate::core::error::ModuleError;
use crate::core::event::{Event, EventType};
use crate::core::module::{ModuleContext, ModuleMeta, ModuleOptions, ScanModule, Watch};

pub const STORAGE_MODULE: &str = "_stor_db";
pub const STDOUT_MODULE: &str = "_stor_stdout";

/// Where the journal of `scan_id` is written.
pub fn journal_path(ctx: &ModuleContext) -> PathBuf {
    ctx.config()
        .data_dir()
        .join("journals")
        .join(format!("{}.jsonl", ctx.scan_id()))
}

/// Appends one event as a JSON line and flushes, so the journal is complete
/// whenever the scan ends.
async fn write_line<W: AsyncWrite + Unpin + Send>(out: &mut W, event: &Event) -> Result<(), ModuleError> {
    let mut line = serde_json::to_vec(event).map_err(|e| ModuleError::Other(e.to_string()))?;
    line.push(b'\n');
    let written = async {
        out.write_all(&line).await?;
        out.flush().await
    };
    written
        .await
        .map_err(|e| ModuleError::Other(format!("could not write event: {e}")))
}

#[derive(Default)]
pub struct StorDb {
    journal: Option<BufWriter<File>>,
}

#[async_trait]
impl ScanModule for StorDb {
    fn meta(&self) -> ModuleMeta {
        ModuleMeta {
            name: STORAGE_MODULE,
            summary: "Journals scan results to the data directory.",
            use_cases: &[],
            categories: &["Storage"],
            flags: &[],
        }
    }

    fn watched_events(&self) -> Watch {
        Watch::All
    }

    fn produced_events(&self) -> Vec<EventType> {
        Vec::new()
    }

    fn setup(&mut self, ctx: &ModuleContext, _options: ModuleOptions) -> Result<(), ModuleError> {
        let path = journal_path(ctx);
        let open = |path: &PathBuf| -> io::Result<fs::File> {
            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir)?;
            }
            OpenOptions::new().create(true).append(true).open(path)
        };
        let file = open(&path)
            .map_err(|e| ModuleError::Setup(format!("cannot open journal {}: {e}", path.display())))?;
        debug!(scan_id = ctx.scan_id(), path = %path.display(), "Journal opened.");
        self.journal = Some(BufWriter::new(File::from_std(file)));
        Ok(())
    }

    async fn handle_event(&mut self, _ctx: &ModuleContext, event: &Event) -> Result<(), ModuleError> {
        match self.journal.as_mut() {
            Some(out) => write_line(out, event).await,
            None => Err(ModuleError::Other("journal is not open".into())),
        }
    }
}

#[derive(Default)]
pub struct StorStdout;

#[async_trait]
impl ScanModule for StorStdout {
    fn meta(&self) -> ModuleMeta {
        ModuleMeta {
            name: STDOUT_MODULE,
            summary: "Prints scan results to standard output.",
            use_cases: &[],
            categories: &["Storage"],
            flags: &[],
        }
    }

    fn watched_events(&self) -> Watch {
        Watch::All
    }

    fn produced_events(&self) -> Vec<EventType> {
        Vec::new()
    }

    fn setup(&mut self, _ctx: &ModuleContext, _options: ModuleOptions) -> Result<(), ModuleError> {
        Ok(())
    }

    async fn handle_event(&mut self, _ctx: &ModuleContext, event: &Event) -> Result<(), ModuleError> {
        write_line(&mut tokio::io::stdout(), event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn journal_lines_are_json() {
        let root = Event::root("example.com");
        let child = Event::new(EventType::InternetName, "example.com", "seed", &root);
        let mut buf = Vec::new();
        write_line(&mut buf, &root).await.unwrap();
        write_line(&mut buf, &child).await.unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<Event> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines, vec![root, child]);
    }

    #[test]
    fn storage_modules_are_never_selected_by_use_case() {
        assert!(StorDb::default().meta().use_cases.is_empty());
        assert!(StorStdout.meta().use_cases.is_empty());
        assert_eq!(StorDb::default().watched_events(), Watch::All);
    }
}
