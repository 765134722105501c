//! `cache-sdk`: make sure the SDK is cached and print its paths.

use anyhow::Context;
use gosdk_core::{Session, Settings};
use tracing::info;

use super::build_cache;

pub async fn run(settings: &Settings, session: Session) -> anyhow::Result<()> {
    let cache = build_cache(settings, session)?;
    let spec = settings.sdk.sdk_spec();
    info!("Go SDK: {}", spec);

    let root = cache
        .resolve_sdk_root(&spec)
        .await
        .with_context(|| format!("Can't obtain Go SDK {}", spec))?;
    let exports = cache.exports(&root)?;

    for (key, value) in exports.to_pairs() {
        println!("{}={}", key, value);
    }
    Ok(())
}
