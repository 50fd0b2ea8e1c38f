//! Command runtime
//!
//! Wires the persistent store, the gateway brokers and the DNS resolver into a
//! facade, then runs one command under a signal that Ctrl+C or the configured
//! timeout fires.

use futures::future;
use futures::StreamExt;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::broker::{Broker, BrokerError, Brokers};
use crate::config::{Command, Config};
use crate::dnslink::{DnsError, DnsEvent, DnsLinkResolver, DnsOptions};
use crate::error::BlockError;
use crate::gateway::GatewayBroker;
use crate::hashing::{cid_for, parse_cid_str, CidError, Hashers, RAW_CODEC};
use crate::identity::IdentityBlockstore;
use crate::networked::NetworkedBlockstore;
use crate::options::RequestOptions;
use crate::progress::{BlockEvent, OnProgress};
use crate::rocksdb_store::RocksBlockstore;
use crate::signal::{AbortController, AbortSignal};
use crate::storage::BlockstoreError;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Block(#[from] BlockError),

    #[error(transparent)]
    Store(#[from] BlockstoreError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Dns(#[from] DnsError),

    #[error(transparent)]
    Cid(#[from] CidError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown hash function: {0}")]
    UnknownHash(String),
}

/// Everything a command needs
pub struct Node {
    pub blocks: NetworkedBlockstore,
    pub resolver: DnsLinkResolver,
    pub offline: bool,
}

impl Node {
    /// Open the block database under `data_dir` and register gateways
    pub fn open(config: &Config) -> Result<Self, RuntimeError> {
        std::fs::create_dir_all(&config.data_dir)?;
        let store = RocksBlockstore::new_with_path(config.data_dir.join("blocks"))?;

        let brokers = config
            .gateways
            .iter()
            .map(|url| Ok(Arc::new(GatewayBroker::new(url.as_str())?) as Arc<dyn Broker>))
            .collect::<Result<Brokers, RuntimeError>>()?;

        info!(
            data_dir = %config.data_dir.display(),
            gateways = brokers.len(),
            offline = config.offline,
            "Opened block store"
        );

        Ok(Self {
            blocks: NetworkedBlockstore::new(
                Arc::new(IdentityBlockstore::new(store)),
                brokers,
                Arc::new(Hashers::default()),
            ),
            resolver: DnsLinkResolver::new(config.dns_resolver.as_str())?,
            offline: config.offline,
        })
    }

    fn request_options(&self, signal: AbortSignal) -> RequestOptions {
        RequestOptions::new()
            .with_signal(signal)
            .offline(self.offline)
            .with_progress(OnProgress::new(|event: &BlockEvent| {
                trace!(event = %event, "Block progress");
            }))
    }
}

/// Run `command` against `node`, writing results to `out`
pub async fn execute<W: Write>(
    node: &Node,
    command: Command,
    signal: AbortSignal,
    out: &mut W,
) -> Result<(), RuntimeError> {
    let opts = node.request_options(signal.clone());

    match command {
        Command::Get { cid, output } => {
            let cid = parse_cid_str(&cid)?;
            let block = node.blocks.get(&cid, &opts).await?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, &block).await?;
                    info!(%cid, path = %path.display(), size = block.len(), "Wrote block");
                }
                None => out.write_all(&block)?,
            }
        }
        Command::Put { file, hash } => {
            let hasher = node
                .blocks
                .hashers()
                .by_name(&hash)
                .ok_or(RuntimeError::UnknownHash(hash))?;
            let data = tokio::fs::read(&file).await?;
            let cid = cid_for(hasher.as_ref(), RAW_CODEC, &data)?;
            node.blocks.put(&cid, data.into(), &opts).await?;
            writeln!(out, "{}", cid)?;
        }
        Command::Has { cid } => {
            let cid = parse_cid_str(&cid)?;
            writeln!(out, "{}", node.blocks.has(&cid, &opts).await?)?;
        }
        Command::Rm { cid } => {
            let cid = parse_cid_str(&cid)?;
            node.blocks.delete(&cid, &opts).await?;
            writeln!(out, "{}", cid)?;
        }
        Command::Ls => {
            let mut blocks = node.blocks.get_all(&opts);
            while let Some(entry) = blocks.next().await {
                let (cid, block) = entry?;
                writeln!(out, "{}\t{}", cid, block.len())?;
            }
        }
        Command::Resolve { domain } => {
            let dns = DnsOptions {
                signal,
                on_progress: Some(OnProgress::new(|event: &DnsEvent| {
                    debug!(event = %event, "DNS progress");
                })),
            };
            writeln!(out, "{}", node.resolver.resolve(&domain, &dns).await?)?;
        }
    }

    out.flush()?;
    Ok(())
}

/// Open the node and run one command; Ctrl+C or the timeout aborts it
pub async fn run(config: Config, command: Command) -> Result<(), RuntimeError> {
    let node = Node::open(&config)?;

    let controller = AbortController::new();
    let signal = controller.signal();
    let timeout = config.timeout_secs.map(Duration::from_secs);

    let watchdog = tokio::spawn(async move {
        let deadline = async {
            match timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => future::pending().await,
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, aborting..."),
            _ = deadline => warn!(?timeout, "Command timed out, aborting..."),
        }
        controller.abort();
    });

    let mut stdout = std::io::stdout();
    let result = execute(&node, command, signal, &mut stdout).await;
    watchdog.abort();

    debug!("{}", node.blocks.metrics().to_prometheus());
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::sha256_cid;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> Node {
        let config = Config {
            data_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        Node::open(&config).unwrap()
    }

    async fn run_command(node: &Node, command: Command) -> Result<String, RuntimeError> {
        let mut out = Vec::new();
        execute(node, command, AbortSignal::never(), &mut out).await?;
        Ok(String::from_utf8(out).unwrap())
    }

    #[tokio::test]
    async fn test_put_get_ls_rm() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("hello.txt");
        std::fs::write(&file, b"hello world").unwrap();
        let node = open(&dir);

        let printed = run_command(
            &node,
            Command::Put {
                file,
                hash: "sha2-256".into(),
            },
        )
        .await
        .unwrap();
        let cid = sha256_cid(b"hello world").unwrap().to_string();
        assert_eq!(printed.trim(), cid);

        let block = run_command(&node, Command::Get { cid: cid.clone(), output: None })
            .await
            .unwrap();
        assert_eq!(block, "hello world");

        let listing = run_command(&node, Command::Ls).await.unwrap();
        assert_eq!(listing.trim(), format!("{}\t11", cid));

        run_command(&node, Command::Rm { cid: cid.clone() }).await.unwrap();
        let has = run_command(&node, Command::Has { cid }).await.unwrap();
        assert_eq!(has.trim(), "false");
    }

    #[tokio::test]
    async fn test_blake3_put() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("data.bin");
        std::fs::write(&file, b"blake3 block").unwrap();
        let node = open(&dir);

        let printed = run_command(
            &node,
            Command::Put {
                file,
                hash: "blake3".into(),
            },
        )
        .await
        .unwrap();
        let cid = parse_cid_str(printed.trim()).unwrap();
        assert_eq!(cid.hash().code(), crate::hashing::BLAKE3_CODE);
    }

    #[tokio::test]
    async fn test_unknown_hash() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("data.bin");
        std::fs::write(&file, b"x").unwrap();
        let node = open(&dir);

        let result = run_command(
            &node,
            Command::Put {
                file,
                hash: "md5".into(),
            },
        )
        .await;
        assert!(matches!(result, Err(RuntimeError::UnknownHash(_))));
    }

    #[tokio::test]
    async fn test_miss_without_gateways_fails_race() {
        let dir = TempDir::new().unwrap();
        let node = open(&dir);
        let cid = sha256_cid(b"elsewhere").unwrap().to_string();

        match run_command(&node, Command::Get { cid, output: None }).await {
            Err(RuntimeError::Block(BlockError::Retrieval(err))) => {
                assert!(err.failures.is_empty());
            }
            other => panic!("expected retrieval error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_invalid_cid() {
        let dir = TempDir::new().unwrap();
        let node = open(&dir);
        let result = tokio_test::block_on(run_command(&node, Command::Has { cid: "nope".into() }));
        assert!(matches!(result, Err(RuntimeError::Cid(_))));
    }
}
