//! Opt-in CPU profiling: wait for the pipeline to warm up, sample for the
//! configured duration, and write a flamegraph.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{error, info};

const WARMUP: Duration = Duration::from_secs(30);

pub async fn run(dir: PathBuf, duration: Duration) {
    if let Err(e) = std::fs::create_dir_all(&dir) {
        error!("profiling: create {}: {e}", dir.display());
        return;
    }

    tokio::time::sleep(WARMUP).await;
    info!("profiling start!");

    let guard = match pprof::ProfilerGuardBuilder::default()
        .frequency(100)
        .blocklist(&["libc", "libgcc", "pthread", "vdso"])
        .build()
    {
        Ok(guard) => guard,
        Err(e) => {
            error!("profiling: {e}");
            return;
        }
    };

    tokio::time::sleep(duration).await;

    let report = match guard.report().build() {
        Ok(report) => report,
        Err(e) => {
            error!("profiling report: {e}");
            return;
        }
    };

    let stamp = chrono::Utc::now().format("%Y-%m-%d_%H:%M:%S");
    let path = dir.join(format!("{stamp}.svg"));
    match std::fs::File::create(&path) {
        Ok(file) => match report.flamegraph(file) {
            Ok(()) => info!("profiling done: {}", path.display()),
            Err(e) => error!("profiling flamegraph: {e}"),
        },
        Err(e) => error!("profiling: create {}: {e}", path.display()),
    }
}
