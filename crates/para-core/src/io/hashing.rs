use std::path::Path;

use para_schema::Sha256Digest;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

const READ_BUFFER: usize = 64 * 1024;

/// Stream a file through SHA256 without loading it into memory.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be opened or read.
pub async fn sha256_file(path: &Path) -> std::io::Result<Sha256Digest> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_BUFFER];
    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(Sha256Digest::from_hasher(hasher))
}
