use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
};

static SCRATCH_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Creates an empty directory unique to this test process and call
pub fn scratch_dir(tag: &str) -> PathBuf {
    let n = SCRATCH_COUNTER.fetch_add(1, Ordering::SeqCst);
    let dir = std::env::temp_dir().join(format!(
        "waterbomb-test-{}-{}-{}",
        std::process::id(),
        tag,
        n
    ));
    if dir.exists() {
        std::fs::remove_dir_all(&dir).unwrap();
    }
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Writes an `sh` script standing in for the FE tool and returns the command
/// that runs it. Running through `sh` avoids exec'ing a freshly written file.
pub fn fake_tool(dir: &Path, name: &str, body: &str) -> Vec<String> {
    let path = dir.join(name);
    std::fs::write(&path, format!("{body}\n")).unwrap();
    vec!["sh".to_owned(), path.to_string_lossy().into_owned()]
}
