use std::future::Future;

use async_trait::async_trait;
use chrono::Utc;
use tokio::{
    sync::mpsc::Sender,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, error, info, trace, warn};

use crate::{
    errors::{ContractStateError, StreamError},
    node::ChainStateReader,
    pools::{decode_price, PoolReference, PriceUpdate, SpotPrice, TokenMetadata},
};

/// Where a session delivers its updates.
#[async_trait]
pub trait PriceSink: Send + Sync {
    /// waits until the consumer took the update
    async fn send(&self, update: PriceUpdate) -> Result<(), StreamError>;

    /// resolves once the consumer went away
    async fn closed(&self);
}

#[async_trait]
impl PriceSink for Sender<PriceUpdate> {
    async fn send(&self, update: PriceUpdate) -> Result<(), StreamError> {
        Sender::send(self, update)
            .await
            .map_err(|_| StreamError::Transport("receiver dropped".to_string()))
    }

    async fn closed(&self) {
        Sender::closed(self).await
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionConfig {
    /// consecutive ticks allowed to fail with a connectivity error before the
    /// session gives up, `0` ends the session on the first failure
    pub max_tick_failures: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub ticks: u64,
    pub emitted: u64,
}

/// One subscription: polls a pool and emits its price whenever it changes.
pub struct PriceSession<R> {
    reader: R,
    pool: PoolReference,
    token0: TokenMetadata,
    token1: TokenMetadata,
    /// last value handed to the sink, never a value that was only computed
    last_emitted: Option<f32>,
    config: SessionConfig,
    consecutive_failures: u32,
    stats: SessionStats,
}

impl<R: ChainStateReader> PriceSession<R> {
    /// Connects to the chain and loads the pool's token metadata. Any error
    /// here ends the session before it streams anything.
    pub async fn init(
        reader: R,
        pool: PoolReference,
        config: SessionConfig,
    ) -> Result<Self, StreamError> {
        let block_number = reader.current_height().await?;

        if let Some(expected) = pool.chain_id {
            let actual = reader.chain_id().await?;
            if actual != expected {
                return Err(ContractStateError::ChainMismatch { expected, actual }.into());
            }
        }

        let (token0, token1) = reader.token_metadata(pool.address, block_number).await?;

        info!(
            target: "dex_stream",
            pool = ?pool.address,
            token0 = %token0.name,
            token1 = %token1.name,
            decimals0 = token0.decimals,
            decimals1 = token1.decimals,
            block_number,
            "initialized price session"
        );

        Ok(Self {
            reader,
            pool,
            token0,
            token1,
            last_emitted: None,
            config,
            consecutive_failures: 0,
            stats: SessionStats::default(),
        })
    }

    pub fn tokens(&self) -> (&TokenMetadata, &TokenMetadata) {
        (&self.token0, &self.token1)
    }

    /// Reads and decodes the pool price, the height and the state come from
    /// the same block.
    pub async fn observe(&self) -> Result<SpotPrice, StreamError> {
        let block_number = self.reader.current_height().await?;
        let sqrt_price_x96 = self
            .reader
            .packed_price_state(self.pool.address, block_number)
            .await?;

        let value = decode_price(
            sqrt_price_x96,
            self.token0.decimals,
            self.token1.decimals,
            self.pool.decode_mode,
        )?;

        debug!(target: "dex_stream::tick", pool = ?self.pool.address, block_number, %sqrt_price_x96, value, "observed price");

        Ok(SpotPrice {
            value,
            block_height: block_number,
            observed_at: Utc::now(),
        })
    }

    /// the update to emit for `price`, if it differs bitwise from the last
    /// emitted value
    fn changed(&self, price: &SpotPrice) -> Result<Option<PriceUpdate>, StreamError> {
        if self.last_emitted.map(f32::to_bits) == Some(price.value.to_bits()) {
            trace!(target: "dex_stream::tick", pool = ?self.pool.address, value = price.value, "price unchanged");
            return Ok(None);
        }

        Ok(Some(PriceUpdate::new(&self.token0, &self.token1, price)?))
    }

    /// Polls until the sink closes (`Ok`) or a tick fails (`Err`).
    ///
    /// Ticks are serialized with their emission: while a read or a send is
    /// pending the timer's missed ticks are skipped. Every await races the
    /// sink closing, nothing is read or sent once it has closed.
    pub async fn run<S: PriceSink + ?Sized>(
        mut self,
        sink: &S,
    ) -> Result<SessionStats, StreamError> {
        let mut timer = interval(self.pool.scrape_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(target: "dex_stream", pool = ?self.pool.address, interval_ms = self.pool.scrape_interval.as_millis() as u64, "streaming prices");

        loop {
            if until_closed(sink, timer.tick()).await.is_none() {
                return Ok(self.finish());
            }
            self.stats.ticks += 1;

            let price = match until_closed(sink, self.observe()).await {
                None => return Ok(self.finish()),
                Some(Ok(price)) => {
                    self.consecutive_failures = 0;
                    price
                }
                Some(Err(e)) => {
                    self.tick_failed(e)?;
                    continue;
                }
            };

            let update = match self.changed(&price) {
                Ok(Some(update)) => update,
                Ok(None) => continue,
                Err(e) => {
                    self.tick_failed(e)?;
                    continue;
                }
            };

            match until_closed(sink, sink.send(update)).await {
                None => return Ok(self.finish()),
                Some(Ok(())) => (),
                Some(Err(e)) => {
                    self.tick_failed(e)?;
                    continue;
                }
            }

            self.last_emitted = Some(price.value);
            self.stats.emitted += 1;
        }
    }

    fn tick_failed(&mut self, e: StreamError) -> Result<(), StreamError> {
        if e.is_transient() && self.consecutive_failures < self.config.max_tick_failures {
            self.consecutive_failures += 1;
            warn!(
                target: "dex_stream",
                pool = ?self.pool.address,
                failures = self.consecutive_failures,
                max = self.config.max_tick_failures,
                "skipping tick - {e}"
            );
            return Ok(());
        }

        error!(target: "dex_stream", pool = ?self.pool.address, ticks = self.stats.ticks, emitted = self.stats.emitted, "price session failed - {e}");
        Err(e)
    }

    fn finish(self) -> SessionStats {
        info!(target: "dex_stream", pool = ?self.pool.address, ticks = self.stats.ticks, emitted = self.stats.emitted, "price session closed");
        self.stats
    }
}

/// `None` if the sink closed before `fut` completed.
async fn until_closed<S, F>(sink: &S, fut: F) -> Option<F::Output>
where
    S: PriceSink + ?Sized,
    F: Future,
{
    tokio::select! {
        biased;
        _ = sink.closed() => None,
        out = fut => Some(out),
    }
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::{
        sync::mpsc::{channel, Receiver},
        task::JoinHandle,
        time::{sleep, timeout, Instant},
    };

    use super::{test_utils::*, *};
    use crate::errors::DecodeError;

    async fn spawn_session(
        reader: MockReader,
        interval_ms: u64,
        config: SessionConfig,
        capacity: usize,
    ) -> (JoinHandle<Result<SessionStats, StreamError>>, Receiver<PriceUpdate>) {
        let (tx, rx) = channel(capacity);
        let session = PriceSession::init(reader, pool(interval_ms), config)
            .await
            .unwrap();
        let handle = tokio::spawn(async move { session.run(&tx).await });

        (handle, rx)
    }

    /// everything the session sends within `window`
    async fn collect_for(rx: &mut Receiver<PriceUpdate>, window: Duration) -> Vec<PriceUpdate> {
        let mut updates = Vec::new();
        let _ = timeout(window, async {
            while let Some(update) = rx.recv().await {
                updates.push(update);
            }
        })
        .await;

        updates
    }

    #[tokio::test(start_paused = true)]
    async fn emits_only_on_change() {
        let reader = MockReader::new([
            Step::Price(sqrt_price(2)),
            Step::Price(sqrt_price(2)),
            Step::Price(sqrt_price(2)),
            Step::Price(sqrt_price(3)),
            Step::Price(sqrt_price(3)),
        ]);
        let (handle, mut rx) = spawn_session(reader.clone(), 100, SessionConfig::default(), 8).await;

        let updates = collect_for(&mut rx, Duration::from_secs(1)).await;
        drop(rx);

        assert_eq!(
            updates.iter().map(|u| u.spot_price).collect::<Vec<_>>(),
            vec![4.0, 9.0]
        );
        assert_eq!(updates[0].token0, "Token A");
        assert_eq!(updates[0].token1, "Token B");
        assert!(updates[0].block_height < updates[1].block_height);

        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats.emitted, 2);
        // the sixth read hung until the sink closed
        assert_eq!(reader.reads().len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn identical_state_emits_nothing_new() {
        let same = sqrt_price(7);
        let reader = MockReader::new([Step::Price(same), Step::Price(same)]);
        let (handle, mut rx) = spawn_session(reader, 100, SessionConfig::default(), 8).await;

        let updates = collect_for(&mut rx, Duration::from_millis(500)).await;
        drop(rx);

        assert_eq!(updates.len(), 1);
        assert_eq!(handle.await.unwrap().unwrap().emitted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_read_ends_the_session() {
        let reader = MockReader::new([
            Step::Price(sqrt_price(1)),
            Step::Price(sqrt_price(2)),
            Step::Fail,
            Step::Price(sqrt_price(3)),
        ]);
        let (handle, mut rx) = spawn_session(reader.clone(), 100, SessionConfig::default(), 8).await;

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, StreamError::Connectivity(_)));

        let mut updates = Vec::new();
        while let Some(update) = rx.recv().await {
            updates.push(update);
        }
        assert_eq!(updates.len(), 2);
        // no tick after the failing one
        assert_eq!(reader.reads().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn tolerates_configured_transient_failures() {
        let reader = MockReader::new([
            Step::Price(sqrt_price(1)),
            Step::Fail,
            Step::Price(sqrt_price(2)),
            Step::Fail,
            Step::Fail,
        ]);
        let config = SessionConfig { max_tick_failures: 1 };
        let (handle, mut rx) = spawn_session(reader, 100, config, 8).await;

        let err = handle.await.unwrap().unwrap_err();
        assert!(err.is_transient());

        let mut updates = Vec::new();
        while let Some(update) = rx.recv().await {
            updates.push(update);
        }
        assert_eq!(
            updates.iter().map(|u| u.spot_price).collect::<Vec<_>>(),
            vec![1.0, 4.0]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_blocked_read() {
        let reader = MockReader::new([
            Step::Price(sqrt_price(1)),
            Step::Hang,
            Step::Price(sqrt_price(2)),
        ]);
        let (handle, mut rx) = spawn_session(reader.clone(), 100, SessionConfig::default(), 8).await;

        assert!(rx.recv().await.is_some());
        // second tick is now stuck in its read
        sleep(Duration::from_millis(150)).await;
        assert_eq!(reader.reads().len(), 2);

        drop(rx);
        let stats = timeout(Duration::from_millis(10), handle)
            .await
            .expect("session didn't stop")
            .unwrap()
            .unwrap();
        assert_eq!(stats.emitted, 1);

        sleep(Duration::from_secs(1)).await;
        assert_eq!(reader.reads().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_blocked_send() {
        let reader = MockReader::rising(10);
        let (handle, rx) = spawn_session(reader.clone(), 100, SessionConfig::default(), 1).await;

        // first update fills the buffer, the second send blocks
        sleep(Duration::from_millis(150)).await;
        drop(rx);

        let stats = timeout(Duration::from_millis(10), handle)
            .await
            .expect("session didn't stop")
            .unwrap()
            .unwrap();
        assert_eq!(stats.emitted, 1);
        assert_eq!(reader.reads().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_consumer_skips_missed_ticks() {
        let reader = MockReader::rising(100);
        let (handle, mut rx) = spawn_session(reader.clone(), 100, SessionConfig::default(), 1).await;

        // ticks 1 and 2 run, then the session waits on the full buffer
        sleep(Duration::from_millis(1_000)).await;
        assert_eq!(reader.reads().len(), 2);

        let released = Instant::now();
        let updates = collect_for(&mut rx, Duration::from_millis(250)).await;
        drop(rx);
        handle.await.unwrap().unwrap();

        // one catch up tick on release, the rest stay on the 100ms grid
        let reads = reader.reads();
        let catch_up = reads
            .iter()
            .filter(|t| **t >= released && **t < released + Duration::from_millis(100))
            .count();
        assert_eq!(catch_up, 1);
        assert_eq!(reads.len(), 5);
        assert_eq!(updates.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn unrepresentable_height_ends_the_session() {
        // init reads i32::MAX, the first tick reads one past it
        let reader = MockReader::rising(3).at_height(i32::MAX as u64 - 1);
        let config = SessionConfig { max_tick_failures: 3 };
        let (handle, mut rx) = spawn_session(reader.clone(), 100, config, 8).await;

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            StreamError::Decode(DecodeError::HeightOutOfRange(h)) if h == i32::MAX as u64 + 1
        ));
        assert!(rx.recv().await.is_none());
        assert_eq!(reader.reads().len(), 1);
    }

    #[tokio::test]
    async fn init_failure_is_fatal() {
        let res =
            PriceSession::init(MockReader::unreachable(), pool(100), SessionConfig::default()).await;
        assert!(matches!(res, Err(StreamError::Connectivity(_))));
    }

    #[tokio::test]
    async fn init_checks_chain_id() {
        let mut pool = pool(100);
        pool.chain_id = Some(137);

        let res =
            PriceSession::init(MockReader::rising(1), pool.clone(), SessionConfig::default()).await;
        assert!(matches!(
            res,
            Err(StreamError::ContractState(ContractStateError::ChainMismatch {
                expected: 137,
                actual: 1
            }))
        ));

        pool.chain_id = Some(1);
        let session = PriceSession::init(MockReader::rising(1), pool, SessionConfig::default())
            .await
            .unwrap();
        assert_eq!(session.tokens().0.name, "Token A");
    }
}
