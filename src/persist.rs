use anyhow::{Context, Result};
use std::path::Path;
use tempfile::NamedTempFile;

/// Replace `path` with `bytes` without ever leaving a half-written file.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .with_context(|| format!("'{}' has no parent directory", path.display()))?;
    tokio::fs::create_dir_all(dir).await?;

    let temp = NamedTempFile::new_in(dir)?;
    let (file, temp_path) = temp.into_parts();
    let mut file = tokio::fs::File::from_std(file);
    tokio::io::AsyncWriteExt::write_all(&mut file, bytes).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&temp_path, path)
        .await
        .with_context(|| format!("unable to replace '{}'", path.display()))?;
    // The file now lives at `path`; forget the temp handle instead of deleting it.
    let _ = temp_path.keep();
    Ok(())
}
