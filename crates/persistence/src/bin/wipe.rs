#![deny(warnings)]

use persistence::{data_dir_from_env, FileKv, KvStore, KEY_NAMESPACE};
use std::path::PathBuf;

fn main() -> anyhow::Result<()> {
    let dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(data_dir_from_env);
    if !dir.exists() {
        println!("nothing to wipe at {}", dir.display());
        return Ok(());
    }
    let kv = FileKv::open(&dir)?;
    let mut removed = 0usize;
    for key in kv.keys()? {
        // Leave foreign files in a shared directory alone
        if key.starts_with(KEY_NAMESPACE) {
            kv.remove(&key)?;
            removed += 1;
        }
    }
    println!("removed {} keys from {}", removed, dir.display());
    Ok(())
}
