use crate::{
    darkest,
    keyvalues::{self, KvValue},
};
use anyhow::Result;
use directories::BaseDirs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageRoot {
    pub path: PathBuf,
}

pub fn find_steam_root() -> Option<PathBuf> {
    steam_root_candidates()
        .into_iter()
        .find(|candidate| candidate.join("steamapps").is_dir())
}

fn steam_root_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(home) = home_dir() {
        candidates.push(home.join(".local/share/Steam"));
        candidates.push(home.join(".steam/steam"));
        candidates.push(home.join(".var/app/com.valvesoftware.Steam/.local/share/Steam"));
    }
    if cfg!(windows) {
        candidates.push(PathBuf::from(r"C:\Program Files (x86)\Steam"));
        candidates.push(PathBuf::from(r"C:\Program Files\Steam"));
    }
    candidates
}

fn home_dir() -> Option<PathBuf> {
    BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf())
}

pub fn parse_library_paths(path: &Path) -> Result<Vec<PathBuf>> {
    let entries = keyvalues::parse_file(path)?;
    let mut paths = Vec::new();
    let Some(folders) = keyvalues::lookup(&entries, "libraryfolders") else {
        return Ok(paths);
    };
    for (key, value) in folders.entries() {
        match value {
            // modern format: numbered blocks carrying a "path" entry
            KvValue::Block(_) => {
                if let Some(library) = value.get("path").and_then(KvValue::as_text) {
                    paths.push(PathBuf::from(library));
                }
            }
            // legacy format: "1" .. "N" map straight to paths
            KvValue::Text(library) => {
                if key.chars().all(|ch| ch.is_ascii_digit()) {
                    paths.push(PathBuf::from(library));
                }
            }
        }
    }
    Ok(paths)
}

pub fn locate_storage_roots(app_id: &str, game_root: Option<&Path>) -> Vec<StorageRoot> {
    if let Some(steam_root) = find_steam_root() {
        return storage_roots_under(&steam_root, app_id);
    }
    let install_dir = game_root
        .map(Path::to_path_buf)
        .or_else(|| find_installed_game(app_id));
    let Some(install_dir) = install_dir else {
        warn!("no Steam root and no {} install found", darkest::GAME_NAME);
        return Vec::new();
    };
    workshop_root_for_install(&install_dir).into_iter().collect()
}

fn storage_roots_under(steam_root: &Path, app_id: &str) -> Vec<StorageRoot> {
    let state_file = darkest::workshop_state_file(app_id);
    let mut roots = Vec::new();
    for library in library_paths(steam_root) {
        let workshop = library.join("steamapps").join("workshop");
        if workshop.join(&state_file).is_file() {
            roots.push(StorageRoot { path: workshop });
        } else {
            debug!("no workshop state for app {app_id} under {}", library.display());
        }
    }
    debug!("found {} workshop storage root(s)", roots.len());
    roots
}

fn library_paths(steam_root: &Path) -> Vec<PathBuf> {
    let registry = steam_root.join("steamapps").join("libraryfolders.vdf");
    let mut libraries = match parse_library_paths(&registry) {
        Ok(paths) => paths,
        Err(err) => {
            debug!("unreadable Steam library registry: {err:#}");
            Vec::new()
        }
    };
    if !libraries.iter().any(|library| library.as_path() == steam_root) {
        libraries.push(steam_root.to_path_buf());
    }
    libraries
}

pub fn find_installed_game(app_id: &str) -> Option<PathBuf> {
    let steam_root = find_steam_root()?;
    installed_game_under(&steam_root, app_id)
}

fn installed_game_under(steam_root: &Path, app_id: &str) -> Option<PathBuf> {
    let manifest_name = darkest::app_manifest_file(app_id);
    for library in library_paths(steam_root) {
        let steamapps = library.join("steamapps");
        let Ok(entries) = keyvalues::parse_file(&steamapps.join(&manifest_name)) else {
            continue;
        };
        let Some(install_dir) = keyvalues::lookup(&entries, "AppState")
            .and_then(|state| state.get("installdir"))
            .and_then(KvValue::as_text)
        else {
            continue;
        };
        let candidate = steamapps.join("common").join(install_dir);
        if candidate.is_dir() {
            return Some(candidate);
        }
    }
    None
}

fn workshop_root_for_install(install_dir: &Path) -> Option<StorageRoot> {
    let steamapps = install_dir.parent()?.parent()?;
    Some(StorageRoot {
        path: steamapps.join("workshop"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn parses_modern_library_registry() {
        let dir = TempDir::new().unwrap();
        let registry = dir.path().join("libraryfolders.vdf");
        write(
            &registry,
            r#""libraryfolders"
{
	"0"
	{
		"path"		"/home/user/.local/share/Steam"
		"label"		""
	}
	"1"
	{
		"path"		"/mnt/games/SteamLibrary"
	}
}
"#,
        );
        let paths = parse_library_paths(&registry).unwrap();
        assert_eq!(
            paths,
            [
                PathBuf::from("/home/user/.local/share/Steam"),
                PathBuf::from("/mnt/games/SteamLibrary"),
            ]
        );
    }

    #[test]
    fn parses_legacy_library_registry() {
        let dir = TempDir::new().unwrap();
        let registry = dir.path().join("libraryfolders.vdf");
        write(
            &registry,
            r#""LibraryFolders"
{
	"TimeNextStatsReport"		"1500000000"
	"ContentStatsID"		"-123"
	"1"		"/mnt/games/SteamLibrary"
}
"#,
        );
        let paths = parse_library_paths(&registry).unwrap();
        assert_eq!(paths, [PathBuf::from("/mnt/games/SteamLibrary")]);
    }

    #[test]
    fn finds_roots_with_workshop_state() {
        let dir = TempDir::new().unwrap();
        let steam_root = dir.path().join("steam");
        let library = dir.path().join("library");
        write(
            &steam_root.join("steamapps/libraryfolders.vdf"),
            &format!(
                "\"libraryfolders\"\n{{\n\t\"0\"\n\t{{\n\t\t\"path\"\t\t\"{}\"\n\t}}\n\t\"1\"\n\t{{\n\t\t\"path\"\t\t\"{}\"\n\t}}\n}}\n",
                steam_root.display(),
                library.display()
            ),
        );
        // only the secondary library has workshop content for the game
        write(
            &library.join("steamapps/workshop/appworkshop_262060.acf"),
            "\"AppWorkshop\"\n{\n}\n",
        );
        let roots = storage_roots_under(&steam_root, "262060");
        assert_eq!(
            roots,
            [StorageRoot {
                path: library.join("steamapps/workshop"),
            }]
        );
    }

    #[test]
    fn missing_registry_still_checks_steam_root_itself() {
        let dir = TempDir::new().unwrap();
        let steam_root = dir.path().join("steam");
        write(
            &steam_root.join("steamapps/workshop/appworkshop_262060.acf"),
            "\"AppWorkshop\"\n{\n}\n",
        );
        let roots = storage_roots_under(&steam_root, "262060");
        assert_eq!(roots.len(), 1);
    }

    #[test]
    fn resolves_install_dir_from_app_manifest() {
        let dir = TempDir::new().unwrap();
        let steam_root = dir.path().join("steam");
        write(
            &steam_root.join("steamapps/appmanifest_262060.acf"),
            "\"AppState\"\n{\n\t\"appid\"\t\t\"262060\"\n\t\"installdir\"\t\t\"DarkestDungeon\"\n}\n",
        );
        fs::create_dir_all(steam_root.join("steamapps/common/DarkestDungeon")).unwrap();
        let install = installed_game_under(&steam_root, "262060").unwrap();
        assert_eq!(install, steam_root.join("steamapps/common/DarkestDungeon"));
    }

    #[test]
    fn derives_workshop_root_from_install_dir() {
        let root =
            workshop_root_for_install(Path::new("/games/steamapps/common/DarkestDungeon")).unwrap();
        assert_eq!(root.path, PathBuf::from("/games/steamapps/workshop"));
    }
}
