use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use iroh::protocol::Router;
use iroh::{EndpointId, SecretKey};
use iroh_gossip::{ALPN as GOSSIP_ALPN, net::Gossip};
use tracing::{debug, info};

use crate::persist::write_atomic;

/// An iroh endpoint with gossip, keeping its identity under `path`.
#[derive(Clone, Debug)]
pub struct Iroh {
    router: Router,
    gossip: Gossip,
    path: PathBuf,
}

impl Iroh {
    pub async fn new(path: PathBuf) -> Result<Self> {
        tokio::fs::create_dir_all(&path).await?;

        let key = load_secret_key(&path.join("keypair")).await?;
        let endpoint = iroh::Endpoint::builder().secret_key(key).bind().await?;
        let gossip = Gossip::builder().spawn(endpoint.clone());
        let router = Router::builder(endpoint)
            .accept(GOSSIP_ALPN, gossip.clone())
            .spawn();
        info!(endpoint = %router.endpoint().id(), "iroh endpoint ready");
        Ok(Self {
            router,
            gossip,
            path,
        })
    }

    pub fn id(&self) -> EndpointId {
        self.endpoint().id()
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn endpoint(&self) -> &iroh::Endpoint {
        self.router.endpoint()
    }

    pub fn gossip(&self) -> &Gossip {
        &self.gossip
    }

    pub async fn shutdown(self) -> Result<()> {
        self.router.shutdown().await?;
        Ok(())
    }
}

async fn load_secret_key(key_path: &Path) -> Result<SecretKey> {
    if key_path.exists() {
        let key_bytes = tokio::fs::read(key_path)
            .await
            .with_context(|| format!("unable to read '{}'", key_path.display()))?;
        let key: [u8; 32] = key_bytes.as_slice().try_into().map_err(|_| {
            anyhow!(
                "invalid keyfile, expected 32 bytes, got {}",
                key_bytes.len()
            )
        })?;
        debug!(path = %key_path.display(), "reusing secret key");
        Ok(SecretKey::from_bytes(&key))
    } else {
        let secret_key = SecretKey::generate(&mut rand::rng());
        write_atomic(key_path, &secret_key.to_bytes())
            .await
            .context("unable to write keyfile")?;
        debug!(path = %key_path.display(), "generated secret key");
        Ok(secret_key)
    }
}
