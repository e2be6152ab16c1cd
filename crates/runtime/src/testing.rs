use std::{
    future::Future,
    pin::Pin,
    sync::{
        Arc,
        Mutex,
    },
    time::{
        Duration,
        SystemTime,
    },
};

use async_trait::async_trait;
use rand::{
    rngs::StdRng,
    RngCore,
    SeedableRng,
};

use crate::Runtime;

/// Deterministic runtime for tests: time only advances when `wait` is
/// called, and randomness is seeded so UUID generation is reproducible.
#[derive(Clone)]
pub struct TestRuntime {
    now: Arc<Mutex<SystemTime>>,
    seed: u64,
}

impl TestRuntime {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(SystemTime::UNIX_EPOCH)),
            seed: 42,
        }
    }

    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += duration;
    }
}

impl Default for TestRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Runtime for TestRuntime {
    async fn wait(&self, duration: Duration) {
        self.advance(duration);
    }

    fn spawn(&self, _name: &'static str, fut: Pin<Box<dyn Future<Output = ()> + Send>>) {
        tokio::spawn(fut);
    }

    fn system_time(&self) -> SystemTime {
        *self.now.lock().unwrap()
    }

    fn rng(&self) -> Box<dyn RngCore + Send> {
        Box::new(StdRng::seed_from_u64(self.seed))
    }
}
