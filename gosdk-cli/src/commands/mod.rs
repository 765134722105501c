//! One orchestrator per CLI command.

pub mod cache_sdk;
pub mod exec;
pub mod folders;

use std::sync::Arc;

use anyhow::Context;
use gosdk_core::{HttpLoader, LocalRepositoryResolver, SdkCache, Session, Settings};

/// Builds the SDK cache over the HTTP loader and the local repository.
pub fn build_cache(settings: &Settings, session: Session) -> anyhow::Result<SdkCache> {
    let loader = HttpLoader::new(&settings.sdk.http_options())
        .context("Can't create HTTP client")?;
    let mut cache = SdkCache::new(settings.sdk.clone(), Arc::new(loader), session)?;
    if let Some(root) = LocalRepositoryResolver::default_root() {
        cache = cache.with_resolver(Arc::new(LocalRepositoryResolver::new(root)));
    }
    Ok(cache)
}
