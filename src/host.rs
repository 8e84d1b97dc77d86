use crate::darkest;
use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModHandle {
    pub name: String,
    pub path: PathBuf,
}

// Narrow view of the host application's mod library. The copy engine only
// ever writes into a single new subfolder of mods_root.
pub trait ModCollection {
    fn mods_root(&self) -> &Path;
    fn installed_mod_names(&self) -> BTreeSet<String>;
    fn get_mod(&self, name: &str) -> Option<ModHandle>;
    fn find_marker_files(&self, prefix: &str) -> Vec<PathBuf>;
}

pub struct DirectoryCollection {
    root: PathBuf,
}

impl DirectoryCollection {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ModCollection for DirectoryCollection {
    fn mods_root(&self) -> &Path {
        &self.root
    }

    fn installed_mod_names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        let Ok(entries) = fs::read_dir(&self.root) else {
            return names;
        };
        for entry in entries.flatten() {
            if !entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false) {
                continue;
            }
            if let Ok(name) = entry.file_name().into_string() {
                names.insert(name);
            }
        }
        names
    }

    fn get_mod(&self, name: &str) -> Option<ModHandle> {
        let path = self.root.join(name);
        path.is_dir().then(|| ModHandle {
            name: name.to_string(),
            path,
        })
    }

    fn find_marker_files(&self, prefix: &str) -> Vec<PathBuf> {
        let mut markers = Vec::new();
        let Ok(entries) = fs::read_dir(&self.root) else {
            return markers;
        };
        for entry in entries.flatten() {
            let project_dir = entry.path().join(darkest::PROJECT_DIR);
            let Ok(files) = fs::read_dir(&project_dir) else {
                continue;
            };
            for file in files.flatten() {
                let path = file.path();
                let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                    continue;
                };
                if name.starts_with(prefix) && name.ends_with(".manifest") && path.is_file() {
                    markers.push(path);
                }
            }
        }
        markers.sort();
        markers
    }
}

pub fn marker_id(path: &Path, prefix: &str) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    stem.strip_prefix(prefix).map(|id| id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn seed_mod(root: &Path, name: &str, marker: Option<&str>) {
        let mod_dir = root.join(name);
        fs::create_dir_all(mod_dir.join(darkest::PROJECT_DIR)).unwrap();
        if let Some(marker) = marker {
            fs::write(mod_dir.join(darkest::PROJECT_DIR).join(marker), "").unwrap();
        }
    }

    #[test]
    fn lists_mod_directories() {
        let dir = TempDir::new().unwrap();
        seed_mod(dir.path(), "Alpha", None);
        seed_mod(dir.path(), "Beta", None);
        fs::write(dir.path().join("stray.txt"), "").unwrap();
        let collection = DirectoryCollection::new(dir.path());
        let names: Vec<String> = collection.installed_mod_names().into_iter().collect();
        assert_eq!(names, ["Alpha", "Beta"]);
        assert!(collection.get_mod("Alpha").is_some());
        assert!(collection.get_mod("Gamma").is_none());
    }

    #[test]
    fn finds_markers_by_prefix() {
        let dir = TempDir::new().unwrap();
        seed_mod(dir.path(), "Imported", Some("w885957080.manifest"));
        seed_mod(dir.path(), "Loose", Some("l42.manifest"));
        seed_mod(dir.path(), "Plain", None);
        let collection = DirectoryCollection::new(dir.path());

        let workshop = collection.find_marker_files("w");
        assert_eq!(workshop.len(), 1);
        assert_eq!(marker_id(&workshop[0], "w").as_deref(), Some("885957080"));

        let local = collection.find_marker_files("l");
        assert_eq!(local.len(), 1);
        assert_eq!(marker_id(&local[0], "l").as_deref(), Some("42"));
    }
}
