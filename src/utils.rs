use log::info;
use std::io;
use std::path::{Path, PathBuf};

const OUTPUT_DIR_NAME: &str = "coastal_htf";

/// Default location for run outputs: `<platform cache dir>/coastal_htf`.
pub fn default_output_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|p| p.join(OUTPUT_DIR_NAME))
}

pub async fn ensure_dir_exists(path: &Path) -> io::Result<()> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => {
            if !metadata.is_dir() {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("Path exists but is not a directory: {}", path.display()),
                ));
            }
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!("Creating directory: {}", path.display());
            tokio::fs::create_dir_all(path).await
        }
        Err(e) => Err(e),
    }
}
