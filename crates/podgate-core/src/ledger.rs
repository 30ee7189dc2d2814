use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{GatewayError, GatewayResult, StoreError};

pub const TOKEN_LEN: usize = 16;

const INVALID_TOKEN: &str = "invalid authentication token";

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Token([u8; TOKEN_LEN]);

impl Token {
    pub fn from_bytes(bytes: [u8; TOKEN_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; TOKEN_LEN] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        B64.encode(self.0)
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.0)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({})", self.fingerprint())
    }
}

fn fingerprint(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(&digest[..4])
}

pub struct TokenLedger {
    path: PathBuf,
    lock: Mutex<()>,
}

impl TokenLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn reset(&self) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "removed tokens from previous session");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn issue(&self) -> Result<Token, StoreError> {
        let mut bytes = [0u8; TOKEN_LEN];
        OsRng.fill_bytes(&mut bytes);
        let token = Token(bytes);

        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&self.path)?;
        let end = block_count(&file)? * TOKEN_LEN as u64;
        if file.metadata()?.len() != end {
            warn!(path = %self.path.display(), "dropping partial block at end of token ledger");
            file.set_len(end)?;
        }
        file.seek(SeekFrom::Start(end))?;
        if let Err(err) = file.write_all(token.as_bytes()).and_then(|()| file.flush()) {
            if let Err(truncate) = file.set_len(end) {
                warn!(error = %truncate, "cannot drop partially written token");
            }
            return Err(err.into());
        }
        debug!(token = %token.fingerprint(), "issued token");
        Ok(token)
    }

    /// Removes `candidate` from the ledger. Fails with an auth error when it
    /// is not present, leaving the file untouched.
    pub fn consume(&self, candidate: &[u8]) -> GatewayResult<()> {
        if candidate.len() != TOKEN_LEN {
            warn!(len = candidate.len(), "candidate token has the wrong length");
            return Err(GatewayError::auth(INVALID_TOKEN));
        }

        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut file = match OpenOptions::new().read(true).write(true).open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                warn!(token = %fingerprint(candidate), "token ledger is empty");
                return Err(GatewayError::auth(INVALID_TOKEN));
            }
            Err(err) => return Err(StoreError::from(err).into()),
        };

        let Some(index) = find_block(&mut file, candidate).map_err(StoreError::from)? else {
            warn!(token = %fingerprint(candidate), "authentication token not found");
            return Err(GatewayError::auth(INVALID_TOKEN));
        };
        remove_block(&mut file, index).map_err(StoreError::from)?;
        debug!(token = %fingerprint(candidate), "consumed token");
        Ok(())
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.len() as usize / TOKEN_LEN),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(0),
            Err(err) => Err(err.into()),
        }
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

fn block_count(file: &File) -> io::Result<u64> {
    Ok(file.metadata()?.len() / TOKEN_LEN as u64)
}

fn find_block(file: &mut File, candidate: &[u8]) -> io::Result<Option<u64>> {
    let blocks = block_count(file)?;
    file.seek(SeekFrom::Start(0))?;
    let mut block = [0u8; TOKEN_LEN];
    for index in 0..blocks {
        file.read_exact(&mut block)?;
        if block[..] == *candidate {
            return Ok(Some(index));
        }
    }
    Ok(None)
}

fn remove_block(file: &mut File, index: u64) -> io::Result<()> {
    let blocks = block_count(file)?;
    let width = TOKEN_LEN as u64;
    let mut block = [0u8; TOKEN_LEN];
    for next in (index + 1)..blocks {
        file.seek(SeekFrom::Start(next * width))?;
        file.read_exact(&mut block)?;
        file.seek(SeekFrom::Start((next - 1) * width))?;
        file.write_all(&block)?;
    }
    file.set_len((blocks - 1) * width)?;
    file.flush()
}
