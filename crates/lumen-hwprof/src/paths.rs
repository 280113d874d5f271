use dirs::data_dir;
use std::path::PathBuf;

pub fn lumen_home() -> PathBuf {
    // Linux resolves to ~/.local/share/Lumen
    data_dir()
        .unwrap_or_else(|| PathBuf::from("~/.local/share"))
        .join("Lumen")
}

pub fn models_dir() -> PathBuf {
    lumen_home().join("models")
}
pub fn plugins_dir() -> PathBuf {
    lumen_home().join("plugins")
}
pub fn engine_config_path() -> PathBuf {
    lumen_home().join("engine.json")
}

pub fn cache_dir() -> PathBuf {
    lumen_home().join("cache")
}
pub fn hwprof_profile_path() -> PathBuf {
    cache_dir().join("hwprof").join("profile.json")
}
