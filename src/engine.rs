//! Bounded-concurrency investigation of discovered hosts.
//!
//! Discovery must never be back-pressured (a stalled reader would wedge the
//! scanner subprocess on a full pipe), so the intake queue is unbounded and
//! the cap is enforced where it matters: on the number of probes in flight
//! at once.

use std::sync::Arc;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use log::debug;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::probe::{Prober, ServiceInstance};
use crate::scan::Host;

#[derive(Debug, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("engine has already been started")]
    AlreadyStarted,
    #[error("engine is not accepting hosts")]
    NotRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Created,
    Running,
    Draining,
    Stopped,
}

/// Accepts hosts from discovery, probes them with at most `concurrency`
/// probes in flight, and hands completed results back through [`drain`].
///
/// Lifecycle: `Created → Running → Draining → Stopped`, driven by
/// [`start`] and [`stop`].
///
/// [`drain`]: InvestigationEngine::drain
/// [`start`]: InvestigationEngine::start
/// [`stop`]: InvestigationEngine::stop
pub struct InvestigationEngine {
    state: State,
    concurrency: usize,
    prober: Arc<dyn Prober>,
    input_tx: Option<mpsc::UnboundedSender<Host>>,
    input_rx: Option<mpsc::UnboundedReceiver<Host>>,
    output_tx: Option<mpsc::UnboundedSender<ServiceInstance>>,
    output_rx: mpsc::UnboundedReceiver<ServiceInstance>,
    dispatcher: Option<JoinHandle<()>>,
}

impl InvestigationEngine {
    /// Allocates the queues without starting any work.
    #[must_use]
    pub fn new(prober: Arc<dyn Prober>, concurrency: usize) -> Self {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        Self {
            state: State::Created,
            concurrency: concurrency.max(1),
            prober,
            input_tx: Some(input_tx),
            input_rx: Some(input_rx),
            output_tx: Some(output_tx),
            output_rx,
            dispatcher: None,
        }
    }

    /// Spawns the dispatcher task and begins accepting hosts.
    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.state != State::Created {
            return Err(EngineError::AlreadyStarted);
        }

        let input_rx = self.input_rx.take().ok_or(EngineError::AlreadyStarted)?;
        let output_tx = self.output_tx.take().ok_or(EngineError::AlreadyStarted)?;
        let prober = Arc::clone(&self.prober);
        let concurrency = self.concurrency;

        self.dispatcher = Some(tokio::spawn(dispatch(
            input_rx,
            output_tx,
            prober,
            concurrency,
        )));
        self.state = State::Running;
        Ok(())
    }

    /// Enqueues a host for investigation. Never blocks; the intake queue is
    /// unbounded.
    pub fn add_host(&self, host: Host) -> Result<(), EngineError> {
        if self.state != State::Running {
            return Err(EngineError::NotRunning);
        }
        self.input_tx
            .as_ref()
            .ok_or(EngineError::NotRunning)?
            .send(host)
            .map_err(|_| EngineError::NotRunning)
    }

    /// Returns every result that has completed so far without waiting for
    /// more. Callers wanting live output poll this between pushes.
    pub fn drain(&mut self) -> Vec<ServiceInstance> {
        let mut ready = Vec::new();
        while let Ok(instance) = self.output_rx.try_recv() {
            ready.push(instance);
        }
        ready
    }

    /// Stops intake, lets the queue empty, waits for every in-flight probe
    /// to finish, then releases the dispatcher. Idempotent, and safe to
    /// call on an engine that never started or never saw a host.
    ///
    /// Closing the intake channel is the cancellation signal the dispatch
    /// loop selects on; completion is bounded because every probe carries
    /// its own HTTP timeout.
    pub async fn stop(&mut self) {
        match self.state {
            State::Stopped => return,
            State::Created => {
                self.state = State::Stopped;
                return;
            }
            State::Running | State::Draining => {}
        }

        self.state = State::Draining;
        self.input_tx.take();

        if let Some(dispatcher) = self.dispatcher.take() {
            if let Err(e) = dispatcher.await {
                debug!("dispatcher task failed: {e}");
            }
        }
        self.state = State::Stopped;
    }
}

/// The dispatch loop: one task multiplexing intake against the set of
/// running probes.
///
/// The `select!` guard on the intake arm is the concurrency gate. While the
/// in-flight set is full, only completions are polled and queued hosts
/// simply wait. When the intake channel closes and empties, the loop falls
/// through to draining whatever is still running.
async fn dispatch(
    mut input_rx: mpsc::UnboundedReceiver<Host>,
    output_tx: mpsc::UnboundedSender<ServiceInstance>,
    prober: Arc<dyn Prober>,
    concurrency: usize,
) {
    let mut in_flight = FuturesUnordered::new();

    loop {
        tokio::select! {
            maybe_host = input_rx.recv(), if in_flight.len() < concurrency => {
                let Some(host) = maybe_host else { break };
                let prober = Arc::clone(&prober);
                let output_tx = output_tx.clone();
                in_flight.push(async move {
                    if let Some(instance) = prober.probe(&host).await {
                        // The receiver only disappears on teardown.
                        let _ = output_tx.send(instance);
                    }
                });
            }
            Some(()) = in_flight.next() => {}
        }
    }

    debug!("intake closed, draining {} in-flight probes", in_flight.len());
    while in_flight.next().await.is_some() {}
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::{EngineError, InvestigationEngine};
    use crate::probe::{Prober, ServiceInstance};
    use crate::scan::Host;

    fn host(n: u8) -> Host {
        Host {
            address: IpAddr::from([10, 0, 0, n]),
            port: 11434,
            discovered_at: 1_700_000_000,
        }
    }

    fn instance_for(host: &Host) -> ServiceInstance {
        ServiceInstance {
            address: host.address,
            port: host.port,
            version: "0.1.32".to_owned(),
            models: vec![],
            last_seen: 1_700_000_000.0,
        }
    }

    /// Counts concurrent entries so tests can observe the in-flight peak.
    struct CountingProber {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl CountingProber {
        fn new() -> Self {
            Self {
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Prober for CountingProber {
        async fn probe(&self, host: &Host) -> Option<ServiceInstance> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Some(instance_for(host))
        }
    }

    /// Matches only even final octets; odd hosts are non-matches.
    struct EvenOctetProber;

    #[async_trait]
    impl Prober for EvenOctetProber {
        async fn probe(&self, host: &Host) -> Option<ServiceInstance> {
            let IpAddr::V4(v4) = host.address else {
                return None;
            };
            (v4.octets()[3] % 2 == 0).then(|| instance_for(host))
        }
    }

    #[tokio::test]
    async fn in_flight_probes_never_exceed_the_cap() {
        let prober = Arc::new(CountingProber::new());
        let mut engine = InvestigationEngine::new(prober.clone(), 4);
        engine.start().unwrap();

        for n in 0..32 {
            engine.add_host(host(n)).unwrap();
        }
        engine.stop().await;

        assert!(
            prober.peak.load(Ordering::SeqCst) <= 4,
            "peak concurrency {} exceeded cap 4",
            prober.peak.load(Ordering::SeqCst)
        );
        assert_eq!(engine.drain().len(), 32);
    }

    #[tokio::test]
    async fn non_matches_are_dropped_silently() {
        let mut engine = InvestigationEngine::new(Arc::new(EvenOctetProber), 8);
        engine.start().unwrap();

        for n in 1..=6 {
            engine.add_host(host(n)).unwrap();
        }
        engine.stop().await;

        let results = engine.drain();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|i| {
            let IpAddr::V4(v4) = i.address else {
                return false;
            };
            v4.octets()[3] % 2 == 0
        }));
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let mut engine = InvestigationEngine::new(Arc::new(EvenOctetProber), 2);
        engine.start().unwrap();
        engine.add_host(host(2)).unwrap();

        engine.stop().await;
        engine.stop().await;

        assert_eq!(engine.drain().len(), 1);
    }

    #[tokio::test]
    async fn stop_without_start_or_hosts_is_safe() {
        let mut engine = InvestigationEngine::new(Arc::new(EvenOctetProber), 2);
        engine.stop().await;
        assert!(engine.drain().is_empty());
    }

    #[tokio::test]
    async fn add_host_is_rejected_outside_running() {
        let mut engine = InvestigationEngine::new(Arc::new(EvenOctetProber), 2);
        assert_eq!(engine.add_host(host(1)), Err(EngineError::NotRunning));

        engine.start().unwrap();
        engine.stop().await;
        assert_eq!(engine.add_host(host(1)), Err(EngineError::NotRunning));
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let mut engine = InvestigationEngine::new(Arc::new(EvenOctetProber), 2);
        engine.start().unwrap();
        assert_eq!(engine.start(), Err(EngineError::AlreadyStarted));
        engine.stop().await;
    }
}
