use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::TlsPaths;

#[derive(Error, Debug)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("no certificate found in {0}")]
    NoCertificates(PathBuf),
    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path).map(BufReader::new).map_err(|source| TlsError::Io {
        path: path.to_owned(),
        source,
    })
}

/// Makes sure the certificate chain and private key parse before the
/// server commits to TLS. Returns the number of certificates in the chain.
pub fn validate(paths: &TlsPaths) -> Result<usize, TlsError> {
    let mut cert_reader = open(&paths.cert)?;
    let certs = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Io {
            path: paths.cert.clone(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(paths.cert.clone()));
    }

    let mut key_reader = open(&paths.key)?;
    let key = rustls_pemfile::private_key(&mut key_reader).map_err(|source| TlsError::Io {
        path: paths.key.clone(),
        source,
    })?;
    if key.is_none() {
        return Err(TlsError::NoPrivateKey(paths.key.clone()));
    }

    Ok(certs.len())
}
