//! Append-only run log, `Log<group>.txt`.
//!
//! Every line is also forwarded to the `log` facade at info level.

use crate::core::config::RichnessConfig;
use crate::core::types::SpeciesCode;
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

const BANNER_WIDTH: usize = 67;

/// Run log file shared by the driver and batch workers.
pub struct RunLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl RunLog {
    /// Open (or create) the log for appending.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line.
    ///
    /// A failed append is reported through `log` and otherwise ignored.
    pub fn line(&self, content: impl AsRef<str>) {
        let content = content.as_ref();
        log::info!("{}", content);
        let mut file = self.file.lock();
        if let Err(e) = writeln!(file, "{}", content) {
            log::warn!("cannot append to {}: {}", self.path.display(), e);
        }
    }

    /// Append several lines.
    pub fn lines<I, S>(&self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for line in lines {
            self.line(line);
        }
    }

    /// Write the run header.
    pub fn header(
        &self,
        started_at: DateTime<Local>,
        config: &RichnessConfig,
        species: &[SpeciesCode],
        species_table: &Path,
    ) {
        let rule = "#".repeat(BANNER_WIDTH);
        self.line("");
        self.line(&rule);
        self.line("The results from richness processing");
        self.line(&rule);
        self.line(started_at.format("%a %b %e %H:%M:%S %Y").to_string());
        self.line(format!(
            "PROCESSING {} SPECIES AS \"{}\".",
            species.len(),
            config.group_name.to_uppercase()
        ));
        self.line(format!("Season of this calculation: {}", config.season));
        self.line(format!(
            "Batch size: {}, expand: {}, parallel: {}",
            config.batch_size, config.expand, config.parallel
        ));
        self.line(format!("Table written to {}", species_table.display()));
        self.line("The species that will be used for analysis:");
        let list: Vec<&str> = species.iter().map(SpeciesCode::as_str).collect();
        self.line(format!("[{}]", list.join(", ")));
    }

    /// Write the closing runtime line.
    pub fn runtime(&self, runtime: Duration) {
        self.line(format!("Total runtime was: {}", format_duration(runtime)));
    }
}

/// Format a duration as `H:MM:SS.mmm`.
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    let hours = millis / 3_600_000;
    let minutes = (millis / 60_000) % 60;
    let seconds = (millis / 1000) % 60;
    format!("{}:{:02}:{:02}.{:03}", hours, minutes, seconds, millis % 1000)
}
