//! Hierarchical blob store over a plain directory, plus the CSV table codec
//! used for every versioned tabular blob the engine persists.
//!
//! Blobs are immutable once written; "latest" is decided purely by
//! lexicographic path order, never by filesystem metadata.

use std::fs::{self, File};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

/// Named, tabular, replaceable dataset: a header row plus string cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl DataTable {
    pub fn new<S: Into<String>>(columns: Vec<S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push_row<S: Into<String>>(&mut self, row: Vec<S>) {
        self.rows.push(row.into_iter().map(Into::into).collect());
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    /// All values of one column; rows shorter than the header contribute
    /// nothing.
    pub fn column_values<'a>(&'a self, name: &str) -> Vec<&'a str> {
        let Some(index) = self.column_index(name) else {
            return Vec::new();
        };
        self.rows
            .iter()
            .filter_map(|row| row.get(index).map(String::as_str))
            .collect()
    }

    pub fn value<'a>(&'a self, row: usize, column: &str) -> Option<&'a str> {
        let index = self.column_index(column)?;
        self.rows.get(row)?.get(index).map(String::as_str)
    }

    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        write_csv_row(&mut out, &self.columns);
        for row in &self.rows {
            write_csv_row(&mut out, row);
        }
        out
    }

    pub fn from_csv(raw: &str) -> Result<Self> {
        let mut records = parse_csv(raw)?;
        if records.is_empty() {
            bail!("csv blob has no header row");
        }
        let columns = records.remove(0);
        Ok(Self {
            columns,
            rows: records,
        })
    }
}

fn write_csv_row(out: &mut String, row: &[String]) {
    for (index, cell) in row.iter().enumerate() {
        if index > 0 {
            out.push(',');
        }
        if cell.contains([',', '"', '\n', '\r']) {
            out.push('"');
            out.push_str(&cell.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(cell);
        }
    }
    out.push('\n');
}

fn parse_csv(raw: &str) -> Result<Vec<Vec<String>>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut cell = String::new();
    let mut in_quotes = false;
    let mut chars = raw.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            match ch {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    cell.push('"');
                }
                '"' => in_quotes = false,
                other => cell.push(other),
            }
            continue;
        }
        match ch {
            '"' => in_quotes = true,
            ',' => record.push(std::mem::take(&mut cell)),
            '\r' => {}
            '\n' => {
                record.push(std::mem::take(&mut cell));
                if !(record.len() == 1 && record[0].is_empty()) {
                    records.push(std::mem::take(&mut record));
                } else {
                    record.clear();
                }
            }
            other => cell.push(other),
        }
    }
    if in_quotes {
        bail!("unterminated quoted cell in csv blob");
    }
    if !cell.is_empty() || !record.is_empty() {
        record.push(cell);
        records.push(record);
    }
    Ok(records)
}

/// Blob store rooted at one directory: list entries under a prefix, write a
/// named blob, open a streamed read of a named blob.
#[derive(Debug, Clone)]
pub struct FolderStore {
    root: PathBuf,
}

impl FolderStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// Relative `/`-separated paths of every blob under `prefix`, sorted so
    /// that lexicographic "latest" scans are deterministic. A missing root
    /// is an empty store, not an error.
    pub fn list_paths(&self, prefix: &str) -> Result<Vec<String>> {
        let mut paths = Vec::new();
        if self.root.exists() {
            collect_paths(&self.root, &self.root, &mut paths)?;
        }
        paths.retain(|path| path.starts_with(prefix));
        paths.sort();
        Ok(paths)
    }

    pub fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        let full = self.root.join(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory: {}", parent.display()))?;
        }
        let mut file = File::create(&full)
            .with_context(|| format!("failed to create blob: {}", full.display()))?;
        file.write_all(data)
            .with_context(|| format!("failed to write blob: {}", full.display()))?;
        Ok(())
    }

    pub fn read_to_string(&self, path: &str) -> Result<String> {
        let full = self.root.join(path);
        let file =
            File::open(&full).with_context(|| format!("failed to open blob: {}", full.display()))?;
        let mut raw = String::new();
        BufReader::new(file)
            .read_to_string(&mut raw)
            .with_context(|| format!("failed to read blob: {}", full.display()))?;
        Ok(raw)
    }
}

fn collect_paths(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("failed to list directory: {}", dir.display()))?;
    for entry in entries {
        let entry =
            entry.with_context(|| format!("failed to read directory entry in {}", dir.display()))?;
        let path = entry.path();
        if path.is_dir() {
            collect_paths(root, &path, out)?;
        } else if let Ok(relative) = path.strip_prefix(root) {
            let mut rendered = String::new();
            for component in relative.components() {
                if !rendered.is_empty() {
                    rendered.push('/');
                }
                rendered.push_str(&component.as_os_str().to_string_lossy());
            }
            out.push(rendered);
        }
    }
    Ok(())
}
