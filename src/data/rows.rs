//! Result table rows and file naming.

use std::fmt;
use std::path::{Path, PathBuf};

/// One logical line of a result table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultRow {
    /// Block header such as `DeviceList`, `SweepSettings` or `Data`.
    Section(String),
    /// `#`-prefixed message line.
    Comment(String),
    /// Comma-separated data cells.
    Cells(Vec<String>),
}

impl ResultRow {
    /// A header line such as `DeviceList` or `Data`.
    pub fn section(name: impl Into<String>) -> Self {
        ResultRow::Section(name.into())
    }

    /// A comment row; the `#` prefix is added unless already present.
    pub fn comment(text: impl Into<String>) -> Self {
        let text = text.into();
        if text.starts_with('#') {
            ResultRow::Comment(text)
        } else {
            ResultRow::Comment(format!("# {}", text))
        }
    }

    /// A data row from anything string-like.
    pub fn cells<I, S>(cells: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ResultRow::Cells(cells.into_iter().map(Into::into).collect())
    }

    /// Whether this is a `#` comment row.
    pub fn is_comment(&self) -> bool {
        matches!(self, ResultRow::Comment(_))
    }

    /// Data cells, if this is a data row.
    pub fn as_cells(&self) -> Option<&[String]> {
        match self {
            ResultRow::Cells(cells) => Some(cells),
            _ => None,
        }
    }
}

impl fmt::Display for ResultRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultRow::Section(name) => f.write_str(name),
            ResultRow::Comment(text) => f.write_str(text),
            ResultRow::Cells(cells) => f.write_str(&cells.join(",")),
        }
    }
}

/// The three orchestrators, as named in result files and headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeasurementKind {
    /// Normal sweep or trigger search.
    Sweep,
    /// Pulse-to-output delay per sweep step.
    Delay,
    /// One voltage/current snapshot per tab.
    Vi,
}

impl MeasurementKind {
    /// Name used in file names and section headers.
    pub fn label(self) -> &'static str {
        match self {
            MeasurementKind::Sweep => "Sweep",
            MeasurementKind::Delay => "Delay",
            MeasurementKind::Vi => "VI",
        }
    }

    /// Name of the settings header block.
    pub fn settings_section(self) -> String {
        format!("{}Settings", self.label())
    }
}

impl fmt::Display for MeasurementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Result-file paths for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultFiles {
    dir: PathBuf,
    stem: String,
    kind: MeasurementKind,
}

impl ResultFiles {
    /// Paths under `dir` named `<stem>_...`.
    pub fn new(dir: impl AsRef<Path>, stem: impl Into<String>, kind: MeasurementKind) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            stem: stem.into(),
            kind,
        }
    }

    /// Measurement the files belong to.
    pub fn kind(&self) -> MeasurementKind {
        self.kind
    }

    /// `<stem>_Temp<Kind>Data.csv`, rewritten after every tab and checkpoint.
    pub fn checkpoint(&self) -> PathBuf {
        self.dir
            .join(format!("{}_Temp{}Data.csv", self.stem, self.kind.label()))
    }

    /// `<stem>_Error<Kind>Data_<tab>_.csv`, written when a tab aborts fatally.
    pub fn error(&self, tab: &str) -> PathBuf {
        self.dir.join(format!(
            "{}_Error{}Data_{}_.csv",
            self.stem,
            self.kind.label(),
            file_safe(tab)
        ))
    }

    /// `<stem>_Abort<Kind>Data_<tab>_.csv`, written on cancellation.
    pub fn abort(&self, tab: &str) -> PathBuf {
        self.dir.join(format!(
            "{}_Abort{}Data_{}_.csv",
            self.stem,
            self.kind.label(),
            file_safe(tab)
        ))
    }

    /// `<stem>_<Kind>Data.csv`, the final result.
    pub fn result(&self) -> PathBuf {
        self.dir
            .join(format!("{}_{}Data.csv", self.stem, self.kind.label()))
    }
}

fn file_safe(tab: &str) -> String {
    tab.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comment_prefix_added_once() {
        assert_eq!(
            ResultRow::comment("no trigger").to_string(),
            "# no trigger"
        );
        assert_eq!(
            ResultRow::comment("# WARN:OSC reset").to_string(),
            "# WARN:OSC reset"
        );
    }

    #[test]
    fn test_cells_render_comma_separated() {
        let row = ResultRow::cells(["Item1", "0.100000000", "1.5"]);
        assert_eq!(row.to_string(), "Item1,0.100000000,1.5");
        assert_eq!(row.as_cells().map(|c| c.len()), Some(3));
    }

    #[test]
    fn test_file_names() {
        let files = ResultFiles::new("/tmp/out", "run", MeasurementKind::Vi);
        assert_eq!(files.checkpoint(), PathBuf::from("/tmp/out/run_TempVIData.csv"));
        assert_eq!(
            files.error("Item1"),
            PathBuf::from("/tmp/out/run_ErrorVIData_Item1_.csv")
        );
        assert_eq!(
            files.abort("a/b"),
            PathBuf::from("/tmp/out/run_AbortVIData_a_b_.csv")
        );
        assert_eq!(files.result(), PathBuf::from("/tmp/out/run_VIData.csv"));
        assert_eq!(MeasurementKind::Delay.settings_section(), "DelaySettings");
    }
}
