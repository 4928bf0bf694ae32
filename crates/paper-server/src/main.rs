use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use paper_llm::FileConfigStore;
use paper_server::auth::{FileWorkRegistry, StaticTokenVerifier};
use paper_server::server;
use paper_server::state::AppState;

#[derive(Parser, Debug)]
#[command(name = "paper-server", about = "论文生成助手服务端")]
struct Args {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// Data root; falls back to PA_DATA_PATH, then ./pa_data.
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));
    let args = Args::parse();

    let data_root = args
        .data_dir
        .unwrap_or_else(paper_workspace::paths::data_root);
    std::fs::create_dir_all(&data_root)?;
    let workspaces_root = data_root.join("workspaces");
    let templates_root = data_root.join("templates");
    std::fs::create_dir_all(&workspaces_root)?;
    std::fs::create_dir_all(&templates_root)?;

    // External collaborators maintain these records; the core only reads
    // them at startup.
    let configs = load_or_default(data_root.join("model_configs.json"), || {
        FileConfigStore::default()
    });
    let auth = load_or_default(data_root.join("tokens.json"), StaticTokenVerifier::new);
    let works = load_or_default(data_root.join("works.json"), FileWorkRegistry::new);

    let state = AppState::new(
        Arc::new(configs),
        Arc::new(auth),
        Arc::new(works),
        workspaces_root,
        templates_root,
    );

    server::run(state, &args.host, args.port).await
}

fn load_or_default<T, F>(path: PathBuf, fallback: F) -> T
where
    T: Loadable,
    F: FnOnce() -> T,
{
    match T::load_from(&path) {
        Ok(loaded) => {
            log::info!("已加载配置: {}", path.display());
            loaded
        }
        Err(e) => {
            log::warn!("未加载 {}（{e}），使用空配置", path.display());
            fallback()
        }
    }
}

trait Loadable: Sized {
    fn load_from(path: &std::path::Path) -> std::io::Result<Self>;
}

impl Loadable for FileConfigStore {
    fn load_from(path: &std::path::Path) -> std::io::Result<Self> {
        FileConfigStore::load(path)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
    }
}

impl Loadable for StaticTokenVerifier {
    fn load_from(path: &std::path::Path) -> std::io::Result<Self> {
        StaticTokenVerifier::load(path)
    }
}

impl Loadable for FileWorkRegistry {
    fn load_from(path: &std::path::Path) -> std::io::Result<Self> {
        FileWorkRegistry::load(path)
    }
}
