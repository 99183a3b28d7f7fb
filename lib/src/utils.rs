use serde::{de::DeserializeOwned, Serialize};
use std::{
  fs,
  io::{self, Write},
  path::{Path, PathBuf},
};

#[cfg(not(debug_assertions))]
use human_panic::setup_panic;
use tracing::subscriber::{DefaultGuard, SetGlobalDefaultError};

#[cfg(debug_assertions)]
extern crate better_panic;

use tracing_subscriber::{self, EnvFilter};

// [NOTE] tracing
//
// Pipeline entry points carry `#[tracing::instrument]`; milestones go to `info!`,
// per-batch detail to `debug!`. The level is picked from RUST_LOG and falls back
// to `info`.

fn env_filter() -> EnvFilter {
  EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn install_logger() -> Result<(), SetGlobalDefaultError> {
  let subscriber = tracing_subscriber::fmt()
    .compact()
    .with_env_filter(env_filter())
    .finish();
  tracing::subscriber::set_global_default(subscriber)
}

pub fn init_logging() -> Result<(), SetGlobalDefaultError> {
  // Human Panic. Only enabled when *not* debugging.
  #[cfg(not(debug_assertions))]
  {
    setup_panic!();
  }

  // Better Panic. Only enabled *when* debugging.
  #[cfg(debug_assertions)]
  {
    better_panic::Settings::debug()
      .most_recent_first(false)
      .lineno_suffix(true)
      .verbosity(better_panic::Verbosity::Full)
      .install();
  }

  install_logger()?;

  Ok(())
}

/// Thread-local subscriber for tests; logging stops when the guard is dropped.
pub fn init_logging_tests() -> DefaultGuard {
  let subscriber = tracing_subscriber::fmt()
    .compact()
    .with_test_writer()
    .with_env_filter(env_filter())
    .finish();
  tracing::subscriber::set_default(subscriber)
}

/// Creates the parent directory of `path` if it has one.
pub fn ensure_parent_dir(path: &Path) -> io::Result<()> {
  match path.parent() {
    Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
    _ => Ok(()),
  }
}

/// Sibling path used as the staging file for atomic writes.
pub fn staging_path(path: &Path) -> PathBuf {
  let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
  name.push(".tmp");
  path.with_file_name(name)
}

/// Writes `bytes` next to `path` and renames over it, so readers only ever see
/// the previous file or the complete new one.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
  ensure_parent_dir(path)?;
  let tmp = staging_path(path);
  {
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
  }
  fs::rename(&tmp, path).map_err(|e| {
    let _ = fs::remove_file(&tmp);
    e
  })
}

pub fn serialize_to_file<T: Serialize>(path: &Path, obj: &T) -> io::Result<()> {
  let buff = serde_json::to_vec_pretty(obj).map_err(io::Error::from)?;
  write_atomic(path, &buff)
}

pub fn deserialize_from_file<T: DeserializeOwned>(path: &Path) -> io::Result<T> {
  let bytes = fs::read(path)?;
  serde_json::from_slice(&bytes).map_err(io::Error::from)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn staging_path_is_a_sibling() {
    let p = Path::new("/tmp/artifacts/net.npz");
    assert_eq!(staging_path(p), PathBuf::from("/tmp/artifacts/net.npz.tmp"));
  }

  #[test]
  fn write_atomic_replaces_and_leaves_no_staging_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("blob.bin");
    write_atomic(&path, b"first").unwrap();
    write_atomic(&path, b"second").unwrap();
    assert_eq!(fs::read(&path).unwrap(), b"second");
    assert!(!staging_path(&path).exists());
  }

  #[test]
  fn json_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("v.json");
    serialize_to_file(&path, &vec![1.5f64, 2.5]).unwrap();
    let back: Vec<f64> = deserialize_from_file(&path).unwrap();
    assert_eq!(back, vec![1.5, 2.5]);
  }
}
