//! Line runner - builds a line, fires a volley, and checks the outcome.

use crate::network::{NetworkStats, SimNetwork};
use crate::scenarios::ScenarioId;

use archers_core::{ArcherConfig, Chain, ChainError, FireEvent, Link, RelayError, Side};
use archers_env::{ArcherContext, TokioContext, TransportProvider};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

/// Timing and size of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineConfig {
    /// Number of archers (at least 1)
    pub archers: usize,

    /// Wait between construction and the first message
    pub pre_fire: Duration,

    /// Pause before every send
    pub hop_delay: Duration,

    /// Length of one counter unit
    pub fire_unit: Duration,

    /// Extra time allowed past the round-trip estimate
    pub grace: Duration,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            archers: 1,
            pre_fire: Duration::ZERO,
            hop_delay: Duration::from_secs(1),
            fire_unit: Duration::from_secs(1),
            grace: Duration::from_secs(1),
        }
    }
}

/// A fire, tagged with the archer's place in the line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FireRecord {
    /// 1-indexed position
    pub position: usize,
    pub archer: String,
    pub value: i64,
    pub elapsed_secs: f64,
}

/// What happened during one run.
#[derive(Debug, Clone)]
pub struct LineReport {
    pub archers: usize,
    pub topology: Vec<Link>,
    pub fires: Vec<FireRecord>,
}

impl LineReport {
    /// Positions that fired, ascending.
    pub fn fired_positions(&self) -> Vec<usize> {
        let mut positions: Vec<usize> = self.fires.iter().map(|f| f.position).collect();
        positions.sort_unstable();
        positions
    }

    /// Checks that exactly `expected` fired, once each, each with its own position.
    pub fn verify(&self, expected: &[usize]) -> Result<(), String> {
        let fired = self.fired_positions();
        if fired != expected {
            return Err(format!("expected fires at {:?}, got {:?}", expected, fired));
        }
        if let Some(wrong) = self.fires.iter().find(|f| f.value != f.position as i64) {
            return Err(format!(
                "archer {} at position {} fired with value {}",
                wrong.archer, wrong.position, wrong.value
            ));
        }
        Ok(())
    }
}

/// Failures that abort a run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Construction failed: {0}")]
    Build(#[from] ChainError),

    #[error("Volley failed to start: {0}")]
    Start(#[from] RelayError),
}

/// Builds a line over `provider`, waits `pre_fire`, fires one volley and
/// collects fires until all archers fired or the round trip must be over.
pub async fn run_line<P, F>(provider: &P, config: &LineConfig, mut on_fire: F) -> Result<LineReport, RunError>
where
    P: TransportProvider,
    F: FnMut(&FireRecord),
{
    let ctx = TokioContext::shared();
    let archer_config = ArcherConfig::default()
        .with_start(ctx.now())
        .with_hop_delay(config.hop_delay)
        .with_fire_unit(config.fire_unit);

    let chain = Chain::build(ctx.clone(), provider, archer_config, config.archers).await?;
    let topology = chain.topology();
    info!("Line of {} archers ready", chain.len());

    let mut running = chain.launch();
    if !config.pre_fire.is_zero() {
        info!("Waiting {:?} before the first message", config.pre_fire);
        ctx.sleep(config.pre_fire).await;
    }
    running.start().await?;

    let within = running.round_trip_estimate() + config.grace;
    let mut records = Vec::with_capacity(config.archers);
    let positions: Vec<_> = running.archers().iter().map(|a| a.id()).collect();
    let record = |event: &FireEvent| FireRecord {
        position: positions.iter().position(|id| *id == event.archer).map_or(0, |i| i + 1),
        archer: event.archer.to_string(),
        value: event.value,
        elapsed_secs: event.elapsed.as_secs_f64(),
    };
    running
        .collect_fires_with(within, |event| {
            let fire = record(event);
            on_fire(&fire);
            records.push(fire);
        })
        .await;

    Ok(LineReport {
        archers: config.archers,
        topology,
        fires: records,
    })
}

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Line length used
    pub archers: usize,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Number of fire events observed
    pub fires: usize,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Stream counters from the simulated network
    pub metrics: NetworkStats,
}

/// Runs fault scenarios over the simulated network.
pub struct ScenarioRunner {
    /// Seed for node IDs and loss decisions
    seed: u64,

    /// Requested line length (raised to the scenario's minimum)
    archers: usize,

    hop_delay: Duration,
    fire_unit: Duration,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64, archers: usize) -> Self {
        Self {
            seed,
            archers,
            hop_delay: Duration::from_millis(50),
            fire_unit: Duration::from_millis(50),
        }
    }

    /// Sets the pacing delay and counter unit.
    pub fn with_timing(mut self, hop_delay: Duration, fire_unit: Duration) -> Self {
        self.hop_delay = hop_delay;
        self.fire_unit = fire_unit;
        self
    }

    fn line_config(&self, archers: usize) -> LineConfig {
        LineConfig {
            archers,
            pre_fire: Duration::ZERO,
            hop_delay: self.hop_delay,
            fire_unit: self.fire_unit,
            grace: self.hop_delay + self.fire_unit,
        }
    }

    /// Runs a scenario and returns the result.
    pub async fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        let archers = match scenario {
            ScenarioId::LoneArcher => 1,
            _ => self.archers.max(scenario.min_archers()),
        };
        info!("Starting scenario: {} (archers={}, seed={})", scenario.name(), archers, self.seed);

        let net = SimNetwork::new(self.seed);
        let outcome = match scenario {
            ScenarioId::Volley | ScenarioId::LoneArcher => self.run_volley(&net, archers).await,
            ScenarioId::BrokenLink => self.run_broken_link(&net, archers).await,
            ScenarioId::LostArrow => self.run_lost_arrow(&net, archers).await,
            ScenarioId::SplitLine => self.run_split_line(&net, archers).await,
        };

        let (fires, failure_reason) = match outcome {
            Ok(fires) => (fires, None),
            Err((fires, reason)) => {
                warn!("Scenario {} failed: {}", scenario.name(), reason);
                (fires, Some(reason))
            }
        };

        ScenarioResult {
            scenario,
            seed: self.seed,
            archers,
            passed: failure_reason.is_none(),
            fires,
            failure_reason,
            metrics: net.controller().stats(),
        }
    }

    /// Runs a line and checks that exactly `expected` fire.
    async fn run_expecting(&self, net: &SimNetwork, archers: usize, expected: &[usize]) -> Result<usize, (usize, String)> {
        match run_line(net, &self.line_config(archers), |_| {}).await {
            Ok(report) => {
                let fires = report.fires.len();
                report.verify(expected).map(|_| fires).map_err(|e| (fires, e))
            }
            Err(e) => Err((0, e.to_string())),
        }
    }

    async fn run_volley(&self, net: &SimNetwork, archers: usize) -> Result<usize, (usize, String)> {
        let expected: Vec<usize> = (1..=archers).collect();
        self.run_expecting(net, archers, &expected).await
    }

    /// Garbles the stream from position k+1 to position k on the return trip.
    async fn run_broken_link(&self, net: &SimNetwork, archers: usize) -> Result<usize, (usize, String)> {
        let k = (archers / 2).max(1);
        net.controller().corrupt_link(net.node_id(k), net.node_id(k - 1));

        let expected: Vec<usize> = (k + 1..=archers).collect();
        self.run_expecting(net, archers, &expected).await
    }

    /// Drops every stream into the tail.
    async fn run_lost_arrow(&self, net: &SimNetwork, archers: usize) -> Result<usize, (usize, String)> {
        net.controller()
            .set_loss(net.node_id(archers - 2), net.node_id(archers - 1), 1.0);
        self.run_expecting(net, archers, &[]).await
    }

    /// Cuts the line in two before construction; the build must fail at the cut.
    async fn run_split_line(&self, net: &SimNetwork, archers: usize) -> Result<usize, (usize, String)> {
        let cut = (archers / 2).max(1);
        let (front, back): (Vec<_>, Vec<_>) = (0..archers).map(|i| net.node_id(i)).enumerate().partition(|(i, _)| *i < cut);
        net.controller().partition(
            front.into_iter().map(|(_, id)| id).collect(),
            back.into_iter().map(|(_, id)| id).collect(),
        );

        match run_line(net, &self.line_config(archers), |_| {}).await {
            Err(RunError::Build(ChainError::Handshake { index, side: Side::Left, .. })) if index == cut => {
                info!("Construction aborted at archer {} as expected", index);
                Ok(0)
            }
            Err(e) => Err((0, format!("unexpected error: {}", e))),
            Ok(report) => {
                error!("Line built across a partition");
                Err((report.fires.len(), "construction succeeded across a partition".to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archers_env::{MemoryNetwork, TcpProvider};
    use proptest::prelude::*;

    #[tokio::test(start_paused = true)]
    async fn test_run_line_reports_every_position() {
        let config = LineConfig {
            archers: 4,
            ..Default::default()
        };
        let mut seen = Vec::new();
        let report = run_line(&MemoryNetwork::new(), &config, |f| seen.push(f.position))
            .await
            .unwrap();

        assert_eq!(report.topology.len(), 4);
        assert_eq!(report.fired_positions(), vec![1, 2, 3, 4]);
        assert!(report.verify(&[1, 2, 3, 4]).is_ok());
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pre_fire_wait_delays_every_fire() {
        let config = LineConfig {
            archers: 1,
            pre_fire: Duration::from_secs(5),
            ..Default::default()
        };
        let report = run_line(&MemoryNetwork::new(), &config, |_| {}).await.unwrap();
        assert_eq!(report.fires.len(), 1);
        assert!(report.fires[0].elapsed_secs >= 6.0);
    }

    #[tokio::test]
    async fn test_zero_archers_is_a_build_error() {
        let config = LineConfig {
            archers: 0,
            ..Default::default()
        };
        let err = run_line(&MemoryNetwork::new(), &config, |_| {}).await.unwrap_err();
        assert!(matches!(err, RunError::Build(ChainError::EmptyChain)));
    }

    #[test]
    fn test_verify_catches_wrong_value() {
        let report = LineReport {
            archers: 1,
            topology: Vec::new(),
            fires: vec![FireRecord {
                position: 1,
                archer: "a".to_string(),
                value: 2,
                elapsed_secs: 2.0,
            }],
        };
        assert!(report.verify(&[1]).is_err());
        assert!(report.verify(&[]).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_scenarios_pass() {
        let runner = ScenarioRunner::new(42, 5);
        for scenario in ScenarioId::all() {
            let result = runner.run(scenario).await;
            assert!(result.passed, "{}: {:?}", scenario, result.failure_reason);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_broken_link_silences_the_front() {
        let result = ScenarioRunner::new(7, 6).run(ScenarioId::BrokenLink).await;
        assert!(result.passed, "{:?}", result.failure_reason);
        // k = 3: positions 4, 5, 6 fire
        assert_eq!(result.fires, 3);
        assert_eq!(result.metrics.corrupted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lone_archer_ignores_requested_length() {
        let result = ScenarioRunner::new(1, 9).run(ScenarioId::LoneArcher).await;
        assert!(result.passed);
        assert_eq!(result.archers, 1);
        assert_eq!(result.fires, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_volley_over_tcp() {
        let config = LineConfig {
            archers: 3,
            pre_fire: Duration::ZERO,
            hop_delay: Duration::from_millis(20),
            fire_unit: Duration::from_millis(20),
            grace: Duration::from_secs(2),
        };
        let report = run_line(&TcpProvider::default(), &config, |_| {}).await.unwrap();
        report.verify(&[1, 2, 3]).unwrap();
        // Real sockets only add latency on top of the paced schedule
        for fire in &report.fires {
            let floor = fire_time(fire.position, 3, 0.02, 0.02);
            assert!(fire.elapsed_secs >= floor - 1e-3, "{:?} fired before {}", fire, floor);
        }
    }

    /// When archer `j` of `n` fires. The head has nobody to forward to on
    /// the way back; everyone else forwards first, then waits `j` units.
    fn fire_time(j: usize, n: usize, hop: f64, unit: f64) -> f64 {
        let (j, n) = (j as f64, n as f64);
        if j == 1.0 && n > 1.0 {
            (2.0 * n - 2.0) * hop + unit
        } else {
            (2.0 * n - j) * hop + j * unit
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fire_schedule() {
        let config = LineConfig {
            archers: 4,
            hop_delay: Duration::from_secs(1),
            fire_unit: Duration::from_secs(2),
            ..Default::default()
        };
        let report = run_line(&MemoryNetwork::new(), &config, |_| {}).await.unwrap();
        assert_eq!(report.fires.len(), 4);
        for fire in &report.fires {
            assert_eq!(fire.elapsed_secs, fire_time(fire.position, 4, 1.0, 2.0), "{:?}", fire);
        }
        // 8s, 10s, 11s, 12s: all inside the (2N - 1)h + Nu = 15s estimate
        let last = report.fires.iter().map(|f| f.elapsed_secs).fold(0.0, f64::max);
        assert_eq!(last, 12.0);
        assert!(last <= 15.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tail_fires_when_return_send_fails() {
        let net = SimNetwork::new(3);
        net.controller().cut_link(net.node_id(2), net.node_id(1));
        let config = LineConfig {
            archers: 3,
            ..Default::default()
        };

        // The volley starts fine; only the tail's send back fails
        let report = run_line(&net, &config, |_| {}).await.unwrap();
        assert_eq!(report.fired_positions(), vec![3]);
        assert_eq!(report.fires[0].value, 3);
        assert_eq!(report.fires[0].elapsed_secs, 6.0);
        report.verify(&[3]).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_loss_is_reproducible() {
        let run = |seed| async move {
            let net = SimNetwork::new(seed);
            for i in 1..4 {
                net.controller().set_loss(net.node_id(i), net.node_id(i - 1), 0.5);
            }
            let config = LineConfig {
                archers: 4,
                ..Default::default()
            };
            run_line(&net, &config, |_| {}).await.unwrap().fired_positions()
        };
        assert_eq!(run(11).await, run(11).await);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(12))]
        #[test]
        fn prop_volley_fires_every_position(archers in 1usize..10, seed in any::<u64>()) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .start_paused(true)
                .build()
                .unwrap();
            let result = rt.block_on(ScenarioRunner::new(seed, archers).run(ScenarioId::Volley));
            prop_assert!(result.passed, "{:?}", result.failure_reason);
            prop_assert_eq!(result.fires, archers);
        }
    }
}
