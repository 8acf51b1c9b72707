use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

use super::types::Digests;

/// Computes content digests for a file
pub trait DigestComputer: Send + Sync {
    fn compute(&self, path: &Path) -> io::Result<Digests>;
}

/// Streams the file once, feeding MD5 and SHA-256 together
#[derive(Debug, Default, Clone, Copy)]
pub struct StreamingDigester;

const CHUNK_SIZE: usize = 4096;

impl DigestComputer for StreamingDigester {
    fn compute(&self, path: &Path) -> io::Result<Digests> {
        let mut file = File::open(path)?;
        let mut md5 = md5::Context::new();
        let mut sha = Sha256::new();
        let mut buf = [0u8; CHUNK_SIZE];

        loop {
            let read = file.read(&mut buf)?;
            if read == 0 {
                break;
            }
            md5.consume(&buf[..read]);
            sha.update(&buf[..read]);
        }

        Ok(Digests {
            md5: format!("{:x}", md5.compute()),
            sha256: hex::encode(sha.finalize()),
        })
    }
}
