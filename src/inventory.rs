use crate::{
    darkest, descriptor,
    host::{self, ModCollection, ModHandle},
    keyvalues::{self, KvValue},
    steam::StorageRoot,
};
use serde::Serialize;
use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModOrigin {
    Workshop,
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkshopRecord {
    pub source_root: PathBuf,
    pub install_manifest: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InventoryRow {
    pub source_path: PathBuf,
    pub display_title: String,
    pub already_imported: bool,
    pub destination_name: String,
    pub destination_path: String,
    pub origin: ModOrigin,
}

#[derive(Debug, Default, PartialEq)]
pub struct Inventory {
    pub rows: Vec<InventoryRow>,
    pub records: BTreeMap<String, WorkshopRecord>,
}

impl Inventory {
    // Called after a successful copy; rows are otherwise rebuilt fresh on
    // every build.
    pub fn record_copy(&mut self, source_path: &Path, name: &str, dest: &Path) {
        for row in &mut self.rows {
            if row.source_path == source_path {
                row.destination_name = name.to_string();
                row.destination_path = dest.display().to_string();
            }
        }
    }
}

pub fn build_inventory(
    app_id: &str,
    roots: &[StorageRoot],
    local_mods_dir: Option<&Path>,
    collection: &dyn ModCollection,
) -> Inventory {
    let records = collect_workshop_records(app_id, roots);
    let imported = marker_handles(collection, "w");

    let mut rows = Vec::new();
    for (id, record) in &records {
        let content_dir = record.source_root.join("content").join(app_id).join(id);
        let parsed = descriptor::read_descriptor(&content_dir.join(darkest::DESCRIPTOR_FILE));
        let handle = imported.get(id);
        rows.push(InventoryRow {
            source_path: content_dir,
            display_title: parsed.title,
            already_imported: handle.is_some(),
            destination_name: handle.map(|h| h.name.clone()).unwrap_or_default(),
            destination_path: handle
                .map(|h| h.path.display().to_string())
                .unwrap_or_default(),
            origin: ModOrigin::Workshop,
        });
    }

    if let Some(dir) = local_mods_dir {
        rows.extend(local_rows(dir, collection));
    }

    rows.sort_by(|a, b| b.destination_path.cmp(&a.destination_path));
    Inventory { rows, records }
}

fn collect_workshop_records(
    app_id: &str,
    roots: &[StorageRoot],
) -> BTreeMap<String, WorkshopRecord> {
    let mut records = BTreeMap::new();
    for root in roots {
        let state_path = root.path.join(darkest::workshop_state_file(app_id));
        let raw = match fs::read_to_string(&state_path) {
            Ok(raw) => raw,
            Err(err) => {
                debug!("no workshop state in {}: {err}", root.path.display());
                continue;
            }
        };
        let entries = match keyvalues::parse(&raw) {
            Ok(entries) => entries,
            Err(err) => {
                warn!("malformed workshop state {}: {err:#}", state_path.display());
                continue;
            }
        };
        let Some(details) = keyvalues::lookup(&entries, "AppWorkshop")
            .and_then(|app| app.get("WorkshopItemDetails"))
        else {
            warn!("no item details in {}", state_path.display());
            continue;
        };
        let mut count = 0usize;
        for (id, detail) in details.entries() {
            let manifest = detail
                .get("manifest")
                .and_then(KvValue::as_text)
                .unwrap_or_default();
            // duplicate ids across roots: the later root wins
            records.insert(
                id.clone(),
                WorkshopRecord {
                    source_root: root.path.clone(),
                    install_manifest: manifest.to_string(),
                },
            );
            count += 1;
        }
        debug!("found {count} workshop record(s) in {}", root.path.display());
    }
    records
}

fn marker_handles(collection: &dyn ModCollection, prefix: &str) -> HashMap<String, ModHandle> {
    let mut handles = HashMap::new();
    for marker in collection.find_marker_files(prefix) {
        let Some(id) = host::marker_id(&marker, prefix) else {
            continue;
        };
        let Some(mod_name) = marker
            .parent()
            .and_then(Path::parent)
            .and_then(|dir| dir.file_name())
            .and_then(|name| name.to_str())
        else {
            continue;
        };
        let Some(handle) = collection.get_mod(mod_name) else {
            continue;
        };
        handles.insert(id, handle);
    }
    handles
}

fn local_rows(dir: &Path, collection: &dyn ModCollection) -> Vec<InventoryRow> {
    let imported = marker_handles(collection, "l");
    let mut rows = Vec::new();
    let Ok(entries) = fs::read_dir(dir) else {
        debug!("no loose mods dir at {}", dir.display());
        return rows;
    };
    let mut folders: Vec<PathBuf> = entries
        .flatten()
        .filter(|entry| entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false))
        .map(|entry| entry.path())
        .collect();
    folders.sort();

    for folder in folders {
        let parsed = descriptor::read_descriptor(&folder.join(darkest::DESCRIPTOR_FILE));
        let display_title = if parsed.title.is_empty() {
            folder
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default()
        } else {
            parsed.title
        };
        let handle = provenance_ids(&folder)
            .iter()
            .find_map(|id| imported.get(id));
        rows.push(InventoryRow {
            source_path: folder.clone(),
            display_title,
            already_imported: handle.is_some(),
            destination_name: handle.map(|h| h.name.clone()).unwrap_or_default(),
            destination_path: handle
                .map(|h| h.path.display().to_string())
                .unwrap_or_default(),
            origin: ModOrigin::Local,
        });
    }
    rows
}

// l<id>.manifest markers left at the source root by earlier copies.
fn provenance_ids(folder: &Path) -> Vec<String> {
    let mut ids = Vec::new();
    let Ok(entries) = fs::read_dir(folder) else {
        return ids;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("manifest") {
            continue;
        }
        if let Some(id) = host::marker_id(&path, "l") {
            ids.push(id);
        }
    }
    ids.sort();
    ids
}
