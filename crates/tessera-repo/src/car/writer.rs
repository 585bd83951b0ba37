//! CAR writing

use crate::error::{RepoError, Result};
use bytes::Bytes;
use cid::Cid as IpldCid;
use iroh_car::CarWriter;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// Write blocks to a CAR file
///
/// Blocks are written in iteration order; pass a [`BlockMap`](crate::BlockMap)
/// for CID order.
pub async fn write_car(
    path: impl AsRef<Path>,
    roots: Vec<IpldCid>,
    blocks: impl IntoIterator<Item = (IpldCid, Bytes)>,
) -> Result<()> {
    let mut file = File::create(path).await.map_err(RepoError::io)?;

    let header = iroh_car::CarHeader::new_v1(roots);
    let mut writer = CarWriter::new(header, &mut file);

    for (cid, data) in blocks {
        writer
            .write(cid, data.as_ref())
            .await
            .map_err(RepoError::car)?;
    }

    writer.finish().await.map_err(RepoError::car)?;
    file.sync_all().await.map_err(RepoError::io)?;

    Ok(())
}

/// Write blocks to CAR bytes under a single root
pub async fn write_car_bytes(
    root: IpldCid,
    blocks: impl IntoIterator<Item = (IpldCid, Bytes)>,
) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let header = iroh_car::CarHeader::new_v1(vec![root]);
    let mut writer = CarWriter::new(header, &mut buffer);

    for (cid, data) in blocks {
        writer
            .write(cid, data.as_ref())
            .await
            .map_err(RepoError::car)?;
    }

    writer.finish().await.map_err(RepoError::car)?;

    buffer.flush().await.map_err(RepoError::io)?;

    Ok(buffer)
}
