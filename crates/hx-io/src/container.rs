//! The hierarchical histogram container.
//!
//! A directory-like namespace tree of named 1-D/2-D histograms, serialized
//! as deterministic JSON (sorted maps). Trial sub-namespaces (`nuclei`,
//! `nuclei0`, `nuclei1`, ...) use identical internal object names so
//! cross-trial comparison works by path alone. The container is
//! single-writer: tasks assemble it in memory and save once at the end.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use hx_hist::{Hist1, Hist2};

use crate::error::{IoError, Result};

/// One directory level: named histograms plus subdirectories.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Folder {
    /// 1-D histograms by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub h1: BTreeMap<String, Hist1>,
    /// 2-D histograms by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub h2: BTreeMap<String, Hist2>,
    /// Subdirectories by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dirs: BTreeMap<String, Folder>,
}

impl Folder {
    fn child(&self, name: &str) -> Option<&Folder> {
        self.dirs.get(name)
    }

    fn child_mut(&mut self, name: &str) -> &mut Folder {
        self.dirs.entry(name.to_string()).or_default()
    }
}

/// The output container of one pipeline stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Container {
    root: Folder,
}

impl Container {
    /// Empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a container from a JSON file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            IoError::Io(std::io::Error::new(e.kind(), format!("{}: {e}", path.display())))
        })?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    /// Serialize the container to a JSON file, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(path)?;
        serde_json::to_writer(BufWriter::new(file), self)?;
        tracing::debug!(path = %path.display(), "container written");
        Ok(())
    }

    /// Resolve (creating) the folder at a `/`-separated path.
    pub fn mkdir(&mut self, path: &str) -> &mut Folder {
        let mut folder = &mut self.root;
        for part in path.split('/').filter(|p| !p.is_empty()) {
            folder = folder.child_mut(part);
        }
        folder
    }

    /// Resolve the folder at a `/`-separated path.
    pub fn folder(&self, path: &str) -> Option<&Folder> {
        let mut folder = &self.root;
        for part in path.split('/').filter(|p| !p.is_empty()) {
            folder = folder.child(part)?;
        }
        Some(folder)
    }

    /// Top-level directory names whose name contains `filter`, with the
    /// bare name (the default namespace) first and trial namespaces in
    /// numeric order after it.
    pub fn namespaces(&self, filter: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .root
            .dirs
            .keys()
            .filter(|k| k.contains(filter))
            .cloned()
            .collect();
        names.sort_by_key(|name| {
            name.strip_prefix(filter)
                .and_then(|suffix| suffix.parse::<u64>().ok())
                .map_or((0, 0), |idx| (1, idx))
        });
        names
    }

    /// Store a 1-D histogram under `dir` using the histogram's own name.
    pub fn put_h1(&mut self, dir: &str, hist: Hist1) {
        self.mkdir(dir).h1.insert(hist.name.clone(), hist);
    }

    /// Store a 1-D histogram under `dir` with an explicit object name.
    pub fn put_h1_as(&mut self, dir: &str, name: &str, mut hist: Hist1) {
        hist.name = name.to_string();
        self.mkdir(dir).h1.insert(name.to_string(), hist);
    }

    /// Store a 2-D histogram under `dir` using the histogram's own name.
    pub fn put_h2(&mut self, dir: &str, hist: Hist2) {
        self.mkdir(dir).h2.insert(hist.name.clone(), hist);
    }

    /// Store a 2-D histogram under `dir` with an explicit object name.
    pub fn put_h2_as(&mut self, dir: &str, name: &str, mut hist: Hist2) {
        hist.name = name.to_string();
        self.mkdir(dir).h2.insert(name.to_string(), hist);
    }

    /// Fetch a 1-D histogram by full path (`dir/.../name`).
    pub fn get_h1(&self, path: &str) -> Result<&Hist1> {
        let (dir, name) = split_path(path);
        self.folder(dir)
            .and_then(|f| f.h1.get(name))
            .ok_or_else(|| IoError::MissingEntry(path.to_string()))
    }

    /// Fetch a 2-D histogram by full path.
    pub fn get_h2(&self, path: &str) -> Result<&Hist2> {
        let (dir, name) = split_path(path);
        self.folder(dir)
            .and_then(|f| f.h2.get(name))
            .ok_or_else(|| IoError::MissingEntry(path.to_string()))
    }

    /// Like [`Container::get_h1`] but returning `None` for absent entries.
    pub fn try_h1(&self, path: &str) -> Option<&Hist1> {
        self.get_h1(path).ok()
    }
}

fn split_path(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(i) => (&path[..i], &path[i + 1..]),
        None => ("", path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hx_hist::Axis;

    fn h1(name: &str) -> Hist1 {
        let mut h = Hist1::new_uniform(name, 4, 0.0, 4.0).unwrap();
        h.fill(1.5);
        h
    }

    #[test]
    fn put_get_by_path() {
        let mut c = Container::new();
        c.put_h1("nuclei/antihe3/TPConly", h1("hTPConlyA0_ExpGaus"));
        let h = c.get_h1("nuclei/antihe3/TPConly/hTPConlyA0_ExpGaus").unwrap();
        assert_eq!(h.content(1), 1.0);
        assert!(c.get_h1("nuclei/antihe3/TPConly/missing").is_err());
    }

    #[test]
    fn namespaces_default_first_then_numeric() {
        let mut c = Container::new();
        for dir in ["nuclei10", "nuclei", "nuclei2", "nuclei0", "other"] {
            c.mkdir(dir);
        }
        assert_eq!(c.namespaces("nuclei"), vec!["nuclei", "nuclei0", "nuclei2", "nuclei10"]);
    }

    #[test]
    fn save_open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("histos.json");

        let mut c = Container::new();
        c.put_h1("nuclei/he3/GausExp", h1("hRawCountsM0"));
        let mut h2 = Hist2::new(
            "fMTPCcounts",
            Axis::from_edges(&[1.0, 2.0, 3.0]).unwrap(),
            Axis::uniform(10, -5.0, 5.0).unwrap(),
        );
        h2.fill(1.5, 0.1);
        c.put_h2("nuclei", h2);
        c.save(&path).unwrap();

        let back = Container::open(&path).unwrap();
        assert_eq!(back.get_h1("nuclei/he3/GausExp/hRawCountsM0").unwrap().content(1), 1.0);
        let h2 = back.get_h2("nuclei/fMTPCcounts").unwrap();
        assert_eq!(h2.content(0, 5), 1.0);
    }

    #[test]
    fn trial_namespaces_share_object_names() {
        let mut c = Container::new();
        c.put_h1_as("nuclei", "fATPCcounts", h1("anything"));
        c.put_h1_as("nuclei0", "fATPCcounts", h1("anything_else"));
        for ns in c.namespaces("nuclei") {
            assert!(c.get_h1(&format!("{ns}/fATPCcounts")).is_ok());
        }
    }
}
