use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::digest::{Algorithm, Digest, Hasher};
use crate::error::{Error, IoResultExt, Result};

/// source of content for the applier, keyed by digest
pub trait ContentProvider {
    /// open a reader over the bytes addressed by `digest`
    fn open(&self, digest: &Digest) -> Result<Box<dyn Read>>;
}

/// content-addressed blob store on the local filesystem
///
/// blobs live at `blobs/<algorithm>/<2-hex>/<62-hex>`, written
/// through a temp file and renamed into place, so a digest is only
/// ever observable once its bytes are durably stored. concurrent
/// puts of the same content converge on one blob.
pub struct ContentStore {
    root: PathBuf,
    algorithm: Algorithm,
}

impl ContentStore {
    /// open a store, creating its directory layout if needed
    pub fn open_at(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("blobs")).with_path(&root)?;
        fs::create_dir_all(root.join("tmp")).with_path(&root)?;
        Ok(Self {
            root,
            algorithm: Algorithm::Sha256,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// filesystem path of a blob
    pub fn blob_path(&self, digest: &Digest) -> PathBuf {
        let (shard, rest) = digest.to_path_components();
        self.root
            .join("blobs")
            .join(digest.algorithm().as_str())
            .join(shard)
            .join(rest)
    }

    pub fn contains(&self, digest: &Digest) -> bool {
        self.blob_path(digest).exists()
    }

    /// stream content into the store, returning its digest
    ///
    /// the digest is computed while writing; the blob becomes
    /// addressable only after the final rename.
    pub fn put(&self, reader: &mut dyn Read) -> Result<Digest> {
        let tmp_path = self.root.join("tmp").join(uuid::Uuid::new_v4().to_string());

        let mut hasher = Hasher::new(self.algorithm);
        {
            let mut tmp_file = File::create(&tmp_path).with_path(&tmp_path)?;
            let mut buf = [0u8; 64 * 1024];
            loop {
                let n = reader.read(&mut buf).with_path(&tmp_path)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
                tmp_file.write_all(&buf[..n]).with_path(&tmp_path)?;
            }
            tmp_file.sync_all().with_path(&tmp_path)?;
        }
        let digest = hasher.finalize();

        let blob_path = self.blob_path(&digest);
        if blob_path.exists() {
            // dedup: another put already stored these bytes
            fs::remove_file(&tmp_path).with_path(&tmp_path)?;
            return Ok(digest);
        }

        let (shard, _) = digest.to_path_components();
        let blob_dir = self
            .root
            .join("blobs")
            .join(digest.algorithm().as_str())
            .join(shard);
        fs::create_dir_all(&blob_dir).with_path(&blob_dir)?;
        fs::rename(&tmp_path, &blob_path).with_path(&blob_path)?;
        fsync_dir(&blob_dir)?;

        Ok(digest)
    }

    /// store a byte slice
    pub fn put_bytes(&self, data: &[u8]) -> Result<Digest> {
        self.put(&mut &data[..])
    }

    /// read a whole blob into memory
    pub fn read(&self, digest: &Digest) -> Result<Vec<u8>> {
        let mut reader = self.open_blob(digest)?;
        let mut data = Vec::new();
        reader
            .read_to_end(&mut data)
            .with_path(self.blob_path(digest))?;
        Ok(data)
    }

    fn open_blob(&self, digest: &Digest) -> Result<File> {
        let path = self.blob_path(digest);
        File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::ContentNotFound(digest.to_string())
            } else {
                Error::Io { path, source: e }
            }
        })
    }
}

impl ContentProvider for ContentStore {
    fn open(&self, digest: &Digest) -> Result<Box<dyn Read>> {
        Ok(Box::new(self.open_blob(digest)?))
    }
}

fn fsync_dir(path: &Path) -> Result<()> {
    let dir = File::open(path).with_path(path)?;
    dir.sync_all().with_path(path)
}
