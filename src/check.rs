use std::io::Read;

use anyhow::{bail, Result};
use clap::Parser;
use md5::{Digest, Md5};
use tracing::{info, warn};

use crate::blobstore::Blobstore;
use crate::BlobId;

#[derive(Parser, Debug)]
pub struct CheckConfig {
    #[arg(required = true, help = "Blob id")]
    pub blob_id: BlobId,
}

/// Reads the blob through the cache and compares its MD5 with the stored digest.
pub fn check_integrity(store: &Blobstore, args: CheckConfig) -> Result<()> {
    let info = store.info(args.blob_id)?;
    let mut stream = store.read_blob(args.blob_id, 0)?;

    let mut hasher = Md5::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    let md5 = faster_hex::hex_string(&hasher.finalize());

    if total != info.size {
        warn!(blob_id = args.blob_id, expected = info.size, total, "size mismatch");
        bail!(
            "blob #{} size mismatch: stored {}, read {}",
            args.blob_id,
            info.size,
            total
        );
    }
    if md5 != info.md5 {
        warn!(blob_id = args.blob_id, expected = %info.md5, actual = %md5, "hash mismatch");
        bail!(
            "blob #{} hash mismatch: stored {}, computed {}",
            args.blob_id,
            info.md5,
            md5
        );
    }

    info!(blob_id = args.blob_id, md5 = %md5, "blob is intact");
    Ok(())
}
