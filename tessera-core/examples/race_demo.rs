//! Races a slow honest broker against a fast one that serves the wrong bytes.
//!
//! Run with: cargo run -p tessera-core --example race_demo

use std::sync::Arc;
use std::time::{Duration, Instant};
use tessera_core::{
    async_trait, sha256_cid, BlockEvent, Broker, BrokerError, Brokers, Bytes, Capabilities, Cid,
    Hashers, MemoryBlockstore, NetworkedBlockstore, OnProgress, RequestOptions, RetrieveOptions,
};

struct Demo {
    name: &'static str,
    block: Bytes,
    delay: Duration,
}

#[async_trait]
impl Broker for Demo {
    fn name(&self) -> &str {
        self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::RETRIEVE
    }

    async fn retrieve(&self, _cid: &Cid, _opts: RetrieveOptions) -> Result<Bytes, BrokerError> {
        tokio::time::sleep(self.delay).await;
        println!("{} answered after {:?}", self.name, self.delay);
        Ok(self.block.clone())
    }
}

#[tokio::main]
async fn main() {
    let data = Bytes::from_static(b"the block everyone wants");
    let cid = sha256_cid(&data).unwrap();

    let blocks = NetworkedBlockstore::new(
        Arc::new(MemoryBlockstore::new()),
        Brokers::new([
            Arc::new(Demo {
                name: "fast-but-wrong",
                block: Bytes::from_static(b"something else"),
                delay: Duration::from_millis(10),
            }) as Arc<dyn Broker>,
            Arc::new(Demo {
                name: "slow-but-right",
                block: data.clone(),
                delay: Duration::from_millis(100),
            }) as Arc<dyn Broker>,
        ]),
        Arc::new(Hashers::default()),
    );

    let opts = RequestOptions::new().with_progress(OnProgress::new(|event: &BlockEvent| {
        println!("  progress: {}", event);
    }));

    let started = Instant::now();
    let block = blocks.get(&cid, &opts).await.unwrap();
    println!("Got {} bytes in {:?}", block.len(), started.elapsed());
    println!("Match: {}", block == data);

    let again = Instant::now();
    blocks.get(&cid, &opts).await.unwrap();
    println!("Second get served locally in {:?}", again.elapsed());
    println!("{}", blocks.metrics().to_prometheus());
}
