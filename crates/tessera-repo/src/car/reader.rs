//! CAR reading with per-block hash verification

use crate::block::BlockMap;
use crate::error::{RepoError, Result};
use bytes::Bytes;
use cid::Cid as IpldCid;
use iroh_car::CarReader;
use n0_future::stream::{Stream, StreamExt};
use std::path::Path;
use std::pin::Pin;
use tessera_common::types::cid::verify_cid;
use tokio::fs::File;
use tokio::io::AsyncRead;

/// Parsed CAR data
#[derive(Debug, Clone)]
pub struct ParsedCar {
    /// All roots from the header, in order
    pub roots: Vec<IpldCid>,
    /// The first root
    pub root: IpldCid,
    /// Every block, verified against its CID
    pub blocks: BlockMap,
}

async fn collect_verified<R: AsyncRead + Send + Unpin>(reader: R) -> Result<ParsedCar> {
    let reader = CarReader::new(reader)
        .await
        .map_err(RepoError::car_parse)?;

    let roots = reader.header().roots().to_vec();
    let root = roots
        .first()
        .copied()
        .ok_or_else(|| RepoError::invalid_cid("CAR header has no roots"))?;

    let mut blocks = BlockMap::new();
    let stream = reader.stream();
    n0_future::pin!(stream);

    while let Some(result) = stream.next().await {
        let (cid, data) = result.map_err(RepoError::car_parse)?;
        verify_cid(&cid, &data)?;
        blocks.set(cid, Bytes::from(data));
    }

    Ok(ParsedCar {
        roots,
        root,
        blocks,
    })
}

/// Parse in-memory CAR bytes (commit events, proofs, uploads)
pub async fn parse_car_bytes(data: &[u8]) -> Result<ParsedCar> {
    collect_verified(data).await
}

/// Read an entire CAR file into memory
///
/// For large archives, prefer [`stream_car`].
pub async fn read_car(path: impl AsRef<Path>) -> Result<ParsedCar> {
    let file = File::open(path).await.map_err(RepoError::io)?;
    collect_verified(file).await
}

/// Stream verified blocks from a CAR file
pub async fn stream_car(path: impl AsRef<Path>) -> Result<CarBlockStream> {
    let file = File::open(path).await.map_err(RepoError::io)?;

    let reader = CarReader::new(file).await.map_err(RepoError::car_parse)?;

    let roots = reader.header().roots().to_vec();
    let stream = Box::pin(reader.stream());

    Ok(CarBlockStream { stream, roots })
}

/// Streaming CAR block reader
///
/// Iterates through blocks without loading the whole archive.
pub struct CarBlockStream {
    stream: Pin<
        Box<dyn Stream<Item = std::result::Result<(IpldCid, Vec<u8>), iroh_car::Error>> + Send>,
    >,
    roots: Vec<IpldCid>,
}

impl CarBlockStream {
    /// Next verified block, `None` once the archive is exhausted
    pub async fn next(&mut self) -> Result<Option<(IpldCid, Bytes)>> {
        match self.stream.next().await {
            Some(result) => {
                let (cid, data) = result.map_err(RepoError::car_parse)?;
                verify_cid(&cid, &data)?;
                Ok(Some((cid, Bytes::from(data))))
            }
            None => Ok(None),
        }
    }

    /// Header roots
    pub fn roots(&self) -> &[IpldCid] {
        &self.roots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RepoErrorKind;
    use crate::car::writer::write_car_bytes;
    use iroh_car::CarWriter;
    use tessera_common::types::cid::cbor_cid;
    use tempfile::NamedTempFile;
    use tokio::io::AsyncWriteExt;

    fn block(n: u8) -> (IpldCid, Bytes) {
        let data = Bytes::from(vec![n; 8]);
        (cbor_cid(&data), data)
    }

    async fn raw_car(roots: Vec<IpldCid>, blocks: Vec<(IpldCid, Vec<u8>)>) -> Vec<u8> {
        let mut buf = Vec::new();
        let header = iroh_car::CarHeader::new_v1(roots);
        let mut writer = CarWriter::new(header, &mut buf);
        for (cid, data) in blocks {
            writer.write(cid, data).await.unwrap();
        }
        writer.finish().await.unwrap();
        buf.flush().await.unwrap();
        buf
    }

    #[tokio::test]
    async fn round_trip_preserves_roots_and_blocks() {
        let (c1, d1) = block(1);
        let (c2, d2) = block(2);
        let bytes = write_car_bytes(c1, vec![(c1, d1.clone()), (c2, d2.clone())])
            .await
            .unwrap();

        let parsed = parse_car_bytes(&bytes).await.unwrap();
        assert_eq!(parsed.root, c1);
        assert_eq!(parsed.roots, vec![c1]);
        assert_eq!(parsed.blocks.len(), 2);
        assert_eq!(parsed.blocks.get(&c1), Some(&d1));
        assert_eq!(parsed.blocks.get(&c2), Some(&d2));
    }

    #[tokio::test]
    async fn tampered_block_is_hash_mismatch() {
        let (c1, _) = block(1);
        let bytes = raw_car(vec![c1], vec![(c1, vec![9; 8])]).await;
        let err = parse_car_bytes(&bytes).await.unwrap_err();
        assert_eq!(err.kind(), RepoErrorKind::HashMismatch);
    }

    #[tokio::test]
    async fn truncated_record_is_rejected() {
        let (c1, d1) = block(1);
        let bytes = write_car_bytes(c1, vec![(c1, d1)]).await.unwrap();
        let truncated = &bytes[..bytes.len() - 3];
        assert!(parse_car_bytes(truncated).await.is_err());
    }

    #[tokio::test]
    async fn truncated_header_is_rejected() {
        let (c1, d1) = block(1);
        let bytes = write_car_bytes(c1, vec![(c1, d1)]).await.unwrap();
        assert!(parse_car_bytes(&bytes[..4]).await.is_err());
    }

    #[tokio::test]
    async fn multiple_roots_from_file() {
        let (c1, d1) = block(1);
        let (c2, _) = block(2);
        let bytes = raw_car(vec![c1, c2], vec![(c1, d1.to_vec())]).await;

        let temp_file = NamedTempFile::new().unwrap();
        tokio::fs::write(temp_file.path(), &bytes).await.unwrap();

        let parsed = read_car(temp_file.path()).await.unwrap();
        assert_eq!(parsed.roots, vec![c1, c2]);
        assert_eq!(parsed.blocks.len(), 1);
    }

    #[tokio::test]
    async fn stream_yields_in_file_order() {
        let (c1, d1) = block(1);
        let (c2, d2) = block(2);
        let bytes = raw_car(vec![c2], vec![(c2, d2.to_vec()), (c1, d1.to_vec())]).await;

        let temp_file = NamedTempFile::new().unwrap();
        tokio::fs::write(temp_file.path(), &bytes).await.unwrap();

        let mut stream = stream_car(temp_file.path()).await.unwrap();
        assert_eq!(stream.roots(), &[c2]);
        assert_eq!(stream.next().await.unwrap().unwrap().0, c2);
        assert_eq!(stream.next().await.unwrap().unwrap().0, c1);
        assert!(stream.next().await.unwrap().is_none());
    }
}
