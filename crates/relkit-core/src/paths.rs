use dirs::home_dir;
use std::path::PathBuf;

/// Returns the relkit home directory (`$RELKIT_HOME`, else `~/.relkit`), or
/// None if the user's home cannot be resolved.
pub fn try_relkit_home() -> Option<PathBuf> {
    if let Ok(val) = std::env::var("RELKIT_HOME") {
        return Some(PathBuf::from(val));
    }
    home_dir().map(|h| h.join(".relkit"))
}

/// Default artifact cache: ~/.relkit/cache
pub fn default_cache_dir() -> Option<PathBuf> {
    try_relkit_home().map(|h| h.join("cache"))
}

/// Sub-directory of the build directory that receives assembled archives.
pub const DISTRIBUTIONS_DIR: &str = "distributions";
