use anyhow::{Context, Result};
use ledger_core::{chain::genesis_block, chain::ChainStore, Block};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Persists the whole chain as a pretty-printed JSON array of blocks.
#[derive(Clone, Debug)]
pub struct JsonFileStore {
  path: PathBuf,
}

impl JsonFileStore {
  pub fn new<P: AsRef<Path>>(path: P) -> Self {
    Self {
      path: path.as_ref().to_path_buf(),
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn read(&self) -> Result<Vec<Block>> {
    let bytes = fs::read(&self.path).with_context(|| format!("reading {}", self.path.display()))?;
    let chain = serde_json::from_slice(&bytes)
      .with_context(|| format!("parsing {}", self.path.display()))?;
    Ok(chain)
  }

  fn tmp_path(&self) -> PathBuf {
    let mut name = self
      .path
      .file_name()
      .map(|n| n.to_os_string())
      .unwrap_or_else(|| "chain.json".into());
    name.push(".tmp");
    self.path.with_file_name(name)
  }
}

impl ChainStore for JsonFileStore {
  /// Missing, unreadable or malformed files yield a genesis-only chain.
  fn load_chain(&self) -> Result<Vec<Block>> {
    if !self.path.exists() {
      info!(path = %self.path.display(), "no chain file; starting from genesis");
      return Ok(vec![genesis_block()]);
    }
    match self.read() {
      Ok(chain) if !chain.is_empty() => {
        info!(path = %self.path.display(), blocks = chain.len(), "chain loaded");
        Ok(chain)
      }
      Ok(_) => {
        warn!(path = %self.path.display(), "chain file is empty; starting from genesis");
        Ok(vec![genesis_block()])
      }
      Err(e) => {
        warn!(path = %self.path.display(), "unusable chain file ({e:#}); starting from genesis");
        Ok(vec![genesis_block()])
      }
    }
  }

  fn save_chain(&self, chain: &[Block]) -> Result<()> {
    if let Some(dir) = self.path.parent() {
      if !dir.as_os_str().is_empty() {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
      }
    }
    let bytes = serde_json::to_vec_pretty(chain)?;
    let tmp = self.tmp_path();
    fs::write(&tmp, bytes).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, &self.path)
      .with_context(|| format!("replacing {}", self.path.display()))?;
    Ok(())
  }
}
