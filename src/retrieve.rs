use std::path::PathBuf;

use anyhow::Result;
use bytes::Bytes;
use clap::Parser;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::blobstore::Blobstore;
use crate::BlobId;

#[derive(Parser, Debug)]
pub struct RetrieveConfig {
    #[arg(required = true, help = "Blob id")]
    pub blob_id: BlobId,

    #[arg(required = true, help = "Destination file path")]
    pub dest: PathBuf,

    #[arg(long, default_value = "0", help = "Position to start reading from")]
    pub start: u64,

    #[arg(long, help = "Load the whole blob into the cache before reading it")]
    pub warm: bool,
}

#[tokio::main]
pub async fn retrieve(store: &Blobstore, args: RetrieveConfig) -> Result<u64> {
    if args.warm {
        let size = store.blob_size(args.blob_id)?;
        store.warm(args.blob_id, args.start, size)?;
    }

    let stream = store.read_blob(args.blob_id, args.start)?;
    let chunk_size = store.cache().fragment_size().max(1) as usize * 64;
    let mut chunks = Box::pin(stream.into_chunk_stream(chunk_size));

    // Create the destination file
    let mut file = tokio::fs::File::create(&args.dest).await?;

    let mut written = 0u64;
    while let Some(chunk_result) = chunks.next().await {
        let chunk: Bytes = chunk_result?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }

    // Ensure all data is written to disk
    file.flush().await?;

    info!(blob_id = args.blob_id, written, dest = %args.dest.display(), "retrieved blob");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::cache::FragmentCache;
    use crate::metrics::SharedMetrics;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn test_retrieve_to_file() {
        let store = Blobstore::new(
            Arc::new(MemoryBackend::new()),
            Arc::new(FragmentCache::new(16).unwrap()),
            SharedMetrics::default(),
        );
        let data: Vec<u8> = (0..5000u32).map(|i| (i % 199) as u8).collect();
        let id = store.store_blob(&mut data.as_slice(), None, None).unwrap();

        let dir = tempdir().unwrap();
        let dest = dir.path().join("out.bin");
        let written = retrieve(
            &store,
            RetrieveConfig {
                blob_id: id,
                dest: dest.clone(),
                start: 1000,
                warm: true,
            },
        )
        .unwrap();

        assert_eq!(written, 4000);
        assert_eq!(std::fs::read(&dest).unwrap(), &data[1000..]);
        assert_eq!(store.cache().cached_bytes(id), 4000);
    }
}
