//! Lumen device profiling crate.
//! Probes CPU/RAM, classifies the device tier, recommends a performance mode and
//! model shape, and caches the profile to ~/.local/share/Lumen/cache/hwprof/profile.json.

pub mod cache;
pub mod detect;
pub mod paths;
pub mod recommend;
pub mod tier;
pub mod types;

pub use cache::{detect_and_cache, load_cached, load_or_detect, validate_or_redetect};
pub use paths::{
    cache_dir, engine_config_path, hwprof_profile_path, lumen_home, models_dir, plugins_dir,
};
pub use recommend::{recommended_mode, recommended_model, tune_engine_config};
pub use tier::classify;
pub use types::{CpuInfo, DeviceProfile, DeviceTier, ModelRecommendation, ThermalState};
