use anyhow::Result;
use tokio::runtime::Runtime;

/// Multi-threaded runtime with one worker per CPU.
pub fn create_runtime() -> Result<Runtime> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("tcchat-worker")
        .enable_all()
        .build()?;
    Ok(runtime)
}
