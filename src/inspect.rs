use anyhow::Result;
use std::path::Path;

use crate::backend::{BlobInfo, Durability, FjallBackend, StorageBackend};
use crate::BlobId;

fn open_backend(path: &Path, chunk_size: usize) -> Result<FjallBackend> {
    // inspection never writes, so nothing needs to be synced
    Ok(FjallBackend::open(path, chunk_size, Durability::Buffer)?)
}

/// Number of keys in the metadata and chunk partitions.
pub fn num_keys(path: &Path, chunk_size: usize) -> Result<(usize, usize)> {
    Ok(open_backend(path, chunk_size)?.num_keys()?)
}

pub fn disk_space(path: &Path, chunk_size: usize) -> Result<u64> {
    Ok(open_backend(path, chunk_size)?.disk_space())
}

pub fn blob_info(path: &Path, chunk_size: usize, blob_id: BlobId) -> Result<BlobInfo> {
    Ok(open_backend(path, chunk_size)?.info(blob_id)?)
}

/// Format bytes in human-readable format
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];

    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Prints a blob's metadata, as JSON when `json` is set.
pub fn print_blob_info(info: &BlobInfo, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(info)?);
        return Ok(());
    }

    println!("Blob: #{}", info.id);
    println!("Size: {} ({} bytes)", format_bytes(info.size), info.size);
    println!(
        "Description: {}",
        info.description.as_deref().unwrap_or("<none>")
    );
    println!("MD5: {}", info.md5);
    println!("Created: {}", info.created_at.format("%Y-%m-%d %H:%M:%S"));
    Ok(())
}
