//! Generates the `ROWMIGRATE_*` allowlist that `status` checks the
//! environment against, and stamps a build id.

use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const PREFIX: &str = "ROWMIGRATE_";

fn is_env_key(literal: &str) -> bool {
    literal.strip_prefix(PREFIX).is_some_and(|rest| {
        !rest.is_empty()
            && rest
                .bytes()
                .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_')
    })
}

fn source_files(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut pending = vec![root.to_path_buf()];
    let mut files = Vec::new();
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|ext| ext == "rs") {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Only whole string literals count, so prose such as `ROWMIGRATE_*` in a
/// doc comment or a name assembled at runtime never lands in the list.
fn literal_keys(source: &str) -> impl Iterator<Item = &str> {
    source.split('"').filter(|segment| is_env_key(segment))
}

fn render(keys: &BTreeSet<&str>) -> String {
    let body = keys
        .iter()
        .map(|key| format!("    {key:?},\n"))
        .collect::<String>();
    format!("pub const GENERATED_ENV_ALLOWLIST: &[&str] = &[\n{body}];\n")
}

fn main() -> io::Result<()> {
    let files = source_files(Path::new("src"))?;
    let sources = files
        .iter()
        .map(fs::read_to_string)
        .collect::<io::Result<Vec<_>>>()?;
    let keys = sources
        .iter()
        .flat_map(|source| literal_keys(source))
        .collect::<BTreeSet<_>>();

    let out_dir = env::var_os("OUT_DIR").ok_or_else(|| io::Error::other("OUT_DIR is not set"))?;
    fs::write(
        Path::new(&out_dir).join("rowmigrate_env_allowlist.rs"),
        render(&keys),
    )?;

    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default();
    println!(
        "cargo:rustc-env=BUILD_ID={}+{stamp:x}",
        env!("CARGO_PKG_VERSION")
    );
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src");
    for file in &files {
        println!("cargo:rerun-if-changed={}", file.display());
    }
    Ok(())
}
