use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use hal_service::{Executor, HttpRequest, TransportOutcome, UreqExecutor};
use mock_server::MockState;
use tokio::net::TcpListener;

/// Starts the mock server on a random port.
pub async fn start_server(state: MockState) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(mock_server::run_with_state(listener, state));
    addr
}

/// Real transport that counts round-trips.
#[derive(Default)]
pub struct CountingExecutor {
    inner: UreqExecutor,
    calls: AtomicUsize,
}

impl CountingExecutor {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Executor for CountingExecutor {
    async fn execute(&self, request: HttpRequest) -> TransportOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.execute(request).await
    }
}
