use crate::{
    darkest, descriptor,
    inventory::{ModOrigin, WorkshopRecord},
};
use filetime::{set_file_mtime, FileTime};
use rand::Rng;
use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::UNIX_EPOCH,
};
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum CopyError {
    #[error("invalid mod name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },
    #[error("a mod named {0:?} already exists")]
    NameCollision(String),
    #[error("workshop item {0:?} has no recorded install manifest")]
    UnregisteredItem(String),
    #[error("{op} {path:?}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    Completed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct CopyProgress {
    pub completed: usize,
    pub total: usize,
    pub detail: Option<String>,
}

pub type ProgressCallback = Arc<dyn Fn(CopyProgress) + Send + Sync>;

#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(dead_code)]
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

const ILLEGAL_NAME_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

pub fn validate_mod_name(name: &str) -> Result<(), CopyError> {
    let invalid = |reason| {
        Err(CopyError::InvalidName {
            name: name.to_string(),
            reason,
        })
    };
    if name.is_empty() {
        return invalid("name is empty");
    }
    if name.contains(ILLEGAL_NAME_CHARS) {
        return invalid(r#"contains one of \ / : * ? " < > |"#);
    }
    if name.starts_with(' ') || name.starts_with('.') {
        return invalid("starts with a space or dot");
    }
    if name.ends_with(' ') {
        return invalid("ends with a space");
    }
    if name.len() > 255 {
        return invalid("longer than 255 characters");
    }
    // Reserved device names are rejected on every platform; the library may
    // be shared with a Windows install.
    let stem = name
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(name);
    if RESERVED_NAMES
        .iter()
        .any(|reserved| stem.eq_ignore_ascii_case(reserved))
    {
        return invalid("reserved device name");
    }
    Ok(())
}

pub fn copy_mod(
    source: &Path,
    mods_root: &Path,
    name: &str,
    origin: ModOrigin,
    records: &BTreeMap<String, WorkshopRecord>,
    progress: Option<&ProgressCallback>,
    cancel: &CancelFlag,
) -> Result<CopyOutcome, CopyError> {
    validate_mod_name(name)?;
    let dest = &mods_root.join(name);
    if dest.exists() {
        return Err(CopyError::NameCollision(name.to_string()));
    }

    let (dirs, files) = enumerate_tree(source)?;
    let total = dirs.len() + files.len();
    let report = |completed: usize, detail: Option<String>| {
        if let Some(callback) = progress {
            callback(CopyProgress {
                completed,
                total,
                detail,
            });
        }
    };
    let mut completed = 0usize;

    fs::create_dir_all(dest).map_err(io_error("create", dest))?;
    for rel in &dirs {
        let target = dest.join(rel);
        fs::create_dir_all(&target).map_err(io_error("create", &target))?;
        completed += 1;
        report(completed, Some(rel.display().to_string()));
        if cancel.is_cancelled() {
            debug!("copy cancelled after {completed}/{total} items");
            return Ok(CopyOutcome::Cancelled);
        }
    }
    for rel in &files {
        let target = dest.join(rel);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(io_error("create", parent))?;
        }
        let source_file = source.join(rel);
        fs::copy(&source_file, &target).map_err(io_error("copy", &source_file))?;
        preserve_mtime(&source_file, &target);
        completed += 1;
        report(completed, Some(rel.display().to_string()));
        if cancel.is_cancelled() {
            debug!("copy cancelled after {completed}/{total} items");
            return Ok(CopyOutcome::Cancelled);
        }
    }

    match origin {
        ModOrigin::Workshop => normalize_workshop(dest, records)?,
        ModOrigin::Local => normalize_local(source, dest)?,
    }
    report(total, None);
    Ok(CopyOutcome::Completed)
}

fn enumerate_tree(source: &Path) -> Result<(Vec<PathBuf>, Vec<PathBuf>), CopyError> {
    let mut dirs = Vec::new();
    let mut files = Vec::new();
    for entry in WalkDir::new(source).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|err| CopyError::Io {
            op: "walk",
            path: source.to_path_buf(),
            source: err.into(),
        })?;
        let Ok(rel) = entry.path().strip_prefix(source) else {
            continue;
        };
        if entry.file_type().is_dir() {
            dirs.push(rel.to_path_buf());
        } else if entry.file_type().is_file() {
            files.push(rel.to_path_buf());
        }
    }
    Ok((dirs, files))
}

fn normalize_workshop(
    dest: &Path,
    records: &BTreeMap<String, WorkshopRecord>,
) -> Result<(), CopyError> {
    let parsed = descriptor::read_descriptor(&dest.join(darkest::DESCRIPTOR_FILE));
    let id = parsed.published_file_id;
    let record = records
        .get(&id)
        .ok_or_else(|| CopyError::UnregisteredItem(id.clone()))?;

    remove_host_artifacts(dest)?;
    let preview_dir = dest.join(darkest::PREVIEW_DIR);
    let project_dir = dest.join(darkest::PROJECT_DIR);
    fs::create_dir_all(&preview_dir).map_err(io_error("create", &preview_dir))?;
    fs::create_dir_all(&project_dir).map_err(io_error("create", &project_dir))?;

    relocate(
        &dest.join(darkest::PREVIEW_FILE),
        &preview_dir.join(format!("{id}.png")),
    )?;
    relocate(
        &dest.join(darkest::DESCRIPTOR_FILE),
        &project_dir.join(format!("{id}.xml")),
    )?;

    let marker = project_dir.join(format!("w{id}.manifest"));
    fs::write(&marker, &record.install_manifest).map_err(io_error("write", &marker))?;
    Ok(())
}

fn normalize_local(source: &Path, dest: &Path) -> Result<(), CopyError> {
    let id = rand::thread_rng().gen_range(1..=9_999_999u32);

    // Provenance marker at the source root so a rebuild can correlate the
    // loose folder with this copy.
    let provenance = source.join(format!("l{id}.manifest"));
    fs::write(&provenance, "").map_err(io_error("write", &provenance))?;

    remove_host_artifacts(dest)?;
    let preview_dir = dest.join(darkest::PREVIEW_DIR);
    let project_dir = dest.join(darkest::PROJECT_DIR);
    fs::create_dir_all(&preview_dir).map_err(io_error("create", &preview_dir))?;
    fs::create_dir_all(&project_dir).map_err(io_error("create", &project_dir))?;

    relocate(
        &dest.join(darkest::PREVIEW_FILE),
        &preview_dir.join(format!("{id}.png")),
    )?;
    relocate(
        &dest.join(darkest::DESCRIPTOR_FILE),
        &project_dir.join(format!("{id}.xml")),
    )?;

    let marker = project_dir.join(format!("l{id}.manifest"));
    fs::write(&marker, "").map_err(io_error("write", &marker))?;
    Ok(())
}

fn remove_host_artifacts(dest: &Path) -> Result<(), CopyError> {
    for name in [darkest::UPLOADER_LOG_FILE, darkest::FILE_LIST_FILE] {
        let path = dest.join(name);
        if path.exists() {
            fs::remove_file(&path).map_err(io_error("remove", &path))?;
        }
    }
    Ok(())
}

fn relocate(from: &Path, to: &Path) -> Result<(), CopyError> {
    if from.exists() {
        fs::rename(from, to).map_err(io_error("move", from))?;
    }
    Ok(())
}

fn io_error<'a>(op: &'static str, path: &'a Path) -> impl FnOnce(io::Error) -> CopyError + 'a {
    move |source| CopyError::Io {
        op,
        path: path.to_path_buf(),
        source,
    }
}

fn preserve_mtime(source: &Path, dest: &Path) {
    let Ok(meta) = fs::metadata(source) else {
        return;
    };
    let Ok(modified) = meta.modified() else {
        return;
    };
    let Ok(duration) = modified.duration_since(UNIX_EPOCH) else {
        return;
    };
    let mtime = FileTime::from_unix_time(duration.as_secs() as i64, duration.subsec_nanos());
    let _ = set_file_mtime(dest, mtime);
}
