//! Protocol entry point, spawned as `caviar-spawn <options-json>`.
//!
//! Not a CLI: the single positional argument is the serialized spawn
//! options. The parent's sandbox assembles both the argument and this
//! process's entire environment.

use caviar::server::ServerRegistry;

#[tokio::main]
async fn main() {
    caviar::logging::init();

    if let Err(err) = caviar::spawner::run(&ServerRegistry::builtin()).await {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}
