// 全局内存分配器：使用 jemalloc
#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

// Thin wrapper over `interfaces::cli`.
use outcome_engine::interfaces::cli;

#[tokio::main]
async fn main() -> cli::CliResult<()> {
    cli::run().await
}
