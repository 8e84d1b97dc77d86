use std::path::{Path, PathBuf};

pub const GAME_NAME: &str = "Darkest Dungeon";
pub const STEAM_APP_ID: &str = "262060";

pub const DESCRIPTOR_FILE: &str = "project.xml";
pub const PREVIEW_FILE: &str = "preview_icon.png";
pub const UPLOADER_LOG_FILE: &str = "steam_workshop_uploader.log";
pub const FILE_LIST_FILE: &str = "modfiles.txt";

pub const PREVIEW_DIR: &str = "preview_file";
pub const PROJECT_DIR: &str = "project_file";

pub fn workshop_state_file(app_id: &str) -> String {
    format!("appworkshop_{app_id}.acf")
}

pub fn app_manifest_file(app_id: &str) -> String {
    format!("appmanifest_{app_id}.acf")
}

pub fn local_mods_dir(game_root: &Path) -> PathBuf {
    game_root.join("mods")
}

pub fn looks_like_game_root(path: &Path) -> bool {
    path.join("dungeons").is_dir() && path.join("heroes").is_dir()
}
