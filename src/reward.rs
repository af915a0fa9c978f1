use std::sync::Mutex;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::errors::EngineError;
use crate::types::RewardReceipt;

/// External reward rail. The engine only ever sees this contract; whether
/// the other side is a real payment processor or the mock testnet below is
/// invisible to game logic.
pub trait RewardIssuer: Send + Sync {
    fn submit_reward(
        &self,
        identity: &str,
        amount_usd: u32,
    ) -> BoxFuture<'static, Result<RewardReceipt, EngineError>>;
}

#[derive(Clone, Copy, Debug)]
pub struct MockIssuerOptions {
    pub latency_ms: u64,
    pub failure_rate: f32,
    pub seed: u64,
}

impl Default for MockIssuerOptions {
    fn default() -> Self {
        Self {
            latency_ms: 2_000,
            failure_rate: 0.0,
            seed: 1,
        }
    }
}

/// Fake testnet payout service: mints deterministic transaction hashes and
/// optionally injects failures so claim-retry paths can be exercised.
pub struct MockTestnetIssuer {
    options: MockIssuerOptions,
    rng: Mutex<StdRng>,
}

impl MockTestnetIssuer {
    pub fn new(options: MockIssuerOptions) -> Self {
        Self {
            options,
            rng: Mutex::new(StdRng::seed_from_u64(options.seed)),
        }
    }

    fn next_receipt(&self, amount_usd: u32) -> Result<RewardReceipt, EngineError> {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if rng.random::<f32>() < self.options.failure_rate {
            return Err(EngineError::RewardUnavailable(
                "testnet rpc did not respond".to_string(),
            ));
        }

        let mut reference = String::with_capacity(66);
        reference.push_str("0x");
        for _ in 0..64 {
            let digit = rng.random_range(0..16u32);
            reference.push(char::from_digit(digit, 16).unwrap_or('0'));
        }
        Ok(RewardReceipt {
            reference,
            amount_usd,
            block_number: rng.random_range(1..1_000_000),
        })
    }
}

impl RewardIssuer for MockTestnetIssuer {
    fn submit_reward(
        &self,
        identity: &str,
        amount_usd: u32,
    ) -> BoxFuture<'static, Result<RewardReceipt, EngineError>> {
        let latency_ms = self.options.latency_ms;
        let result = self.next_receipt(amount_usd);
        if let Ok(receipt) = &result {
            println!(
                "[reward] sending ${amount_usd} USD to {identity} (tx {})",
                receipt.reference
            );
        }
        async move {
            if latency_ms > 0 {
                tokio::time::sleep(Duration::from_millis(latency_ms)).await;
            }
            result
        }
        .boxed()
    }
}
