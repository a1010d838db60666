use crate::config::EngineConfig;
use crate::error::Result;
use crate::repo::DedupRepo;
use crate::repo_fs::FsDedupRepo;

pub enum Backend {
    Fs,
}

pub fn open_repo(backend: Backend, config: EngineConfig) -> Result<Box<dyn DedupRepo>> {
    match backend {
        Backend::Fs => Ok(Box::new(FsDedupRepo::open(config)?)),
    }
}
