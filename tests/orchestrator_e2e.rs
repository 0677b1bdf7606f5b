use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver};
use reconcile::{
    AgentContext, AgentError, AgentProposal, AgentRole, Catalog, ConflictDescriptor,
    ConstraintId, ConstraintProposal, ConstraintStore, DependencyGraph, ExecutionOrchestrator,
    ExtractionAgent, OrchestratorConfig, Session, SessionConfig, StateSnapshot, SystemClock,
};

struct Scripted {
    id: &'static str,
    role: AgentRole,
    delay: Duration,
    result: Result<AgentProposal, AgentError>,
    calls: AtomicUsize,
}

impl Scripted {
    fn ok(id: &'static str, role: AgentRole, proposal: AgentProposal) -> Arc<Self> {
        Arc::new(Self {
            id,
            role,
            delay: Duration::ZERO,
            result: Ok(proposal),
            calls: AtomicUsize::new(0),
        })
    }

    fn slow(id: &'static str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            id,
            role: AgentRole::Validator,
            delay,
            result: Ok(AgentProposal::new().with_confidence(0.9)),
            calls: AtomicUsize::new(0),
        })
    }

    fn failing(id: &'static str) -> Arc<Self> {
        Arc::new(Self {
            id,
            role: AgentRole::Elicitor,
            delay: Duration::ZERO,
            result: Err(AgentError::failed(id, "model unavailable")),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ExtractionAgent for Scripted {
    fn id(&self) -> &str {
        self.id
    }

    fn role(&self) -> AgentRole {
        self.role
    }

    fn process(
        &self,
        _input: &str,
        _snapshot: &StateSnapshot,
        ctx: &AgentContext,
    ) -> Result<AgentProposal, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = Duration::from_millis(10);
        let mut waited = Duration::ZERO;
        while waited < self.delay {
            if ctx.is_cancelled() {
                return Err(AgentError::Cancelled {
                    agent: self.id.to_string(),
                });
            }
            thread::sleep(step);
            waited += step;
        }
        self.result.clone()
    }
}

/// Blocks until released, never looking at the cancellation flag.
struct Stubborn {
    release: Receiver<()>,
}

impl ExtractionAgent for Stubborn {
    fn id(&self) -> &str {
        "stubborn_validator"
    }

    fn role(&self) -> AgentRole {
        AgentRole::Validator
    }

    fn process(
        &self,
        _input: &str,
        _snapshot: &StateSnapshot,
        _ctx: &AgentContext,
    ) -> Result<AgentProposal, AgentError> {
        let _ = self.release.recv();
        Ok(AgentProposal::new())
    }
}

fn erase<A: ExtractionAgent + 'static>(agent: Arc<A>) -> Arc<dyn ExtractionAgent> {
    agent
}

fn orchestrator(
    agents: Vec<Arc<dyn ExtractionAgent>>,
    config: OrchestratorConfig,
) -> (Arc<ConstraintStore>, ExecutionOrchestrator) {
    let catalog = Catalog::builtin();
    let store = Arc::new(ConstraintStore::new("orch", &catalog));
    let graph = Arc::new(DependencyGraph::from_catalog(&catalog));
    let orch = ExecutionOrchestrator::new(
        Arc::clone(&store),
        graph,
        agents,
        Arc::new(SystemClock),
        config,
    )
    .unwrap();
    (store, orch)
}

#[test]
fn failure_and_timeout_are_isolated() {
    let good = Scripted::ok(
        "specification_mapper",
        AgentRole::Mapper,
        AgentProposal::new()
            .with_use_case("UC3", 0.9)
            .with_constraint(ConstraintProposal::new("CNST_RTOS")),
    );
    let (store, orch) = orchestrator(
        vec![
            erase(Arc::clone(&good)),
            erase(Scripted::failing("requirements_elicitor")),
            erase(Scripted::slow("constraint_validator", Duration::from_secs(5))),
        ],
        OrchestratorConfig::default().with_round_timeout(Duration::from_millis(200)),
    );

    let result = orch.process_input("rtos controller", &[]);

    assert!(!result.success);
    assert_eq!(result.agent_results.len(), 3);
    assert!(store.contains(&ConstraintId::new("CNST_RTOS")));

    let by_id = |id: &str| {
        result
            .agent_results
            .iter()
            .find(|o| o.agent_id == id)
            .unwrap()
    };
    assert!(by_id("specification_mapper").success());
    assert!(matches!(
        by_id("requirements_elicitor").error(),
        Some(AgentError::Failed { .. })
    ));
    assert!(by_id("constraint_validator").error().unwrap().is_timeout());
    assert!(result.total_time < Duration::from_secs(2));

    let metrics = orch.metrics();
    assert_eq!(metrics.execution_count, 1);
    assert_eq!(metrics.timeouts, 1);
    assert_eq!(metrics.failures, 1);
}

#[test]
fn every_agent_runs_once_per_round() {
    let a = Scripted::ok("a", AgentRole::Mapper, AgentProposal::new());
    let b = Scripted::ok("b", AgentRole::Validator, AgentProposal::new());
    let (_, orch) = orchestrator(
        vec![erase(Arc::clone(&a)), erase(Arc::clone(&b))],
        OrchestratorConfig::default().with_workers(1),
    );

    for _ in 0..3 {
        assert!(orch.process_input("x", &[]).success);
    }
    assert_eq!(a.calls(), 3);
    assert_eq!(b.calls(), 3);
    assert_eq!(orch.metrics().execution_count, 3);
}

#[test]
fn readings_carry_configured_weights() {
    let mapper = Scripted::ok(
        "specification_mapper",
        AgentRole::Mapper,
        AgentProposal::new()
            .with_confidence(0.7)
            .with_constraint(ConstraintProposal::new("CNST_ETHERNET"))
            .with_constraint(ConstraintProposal::new("CNST_RTOS")),
    );
    let (_, orch) = orchestrator(
        vec![erase(mapper)],
        OrchestratorConfig::default().with_agent_weight("specification_mapper", 0.4),
    );

    let result = orch.process_input("x", &[]);
    assert_eq!(result.readings.len(), 1);
    let reading = &result.readings[0];
    assert!((reading.confidence - 0.7).abs() < 1e-9);
    assert!((reading.expertise_weight - 0.4).abs() < 1e-9);
    assert_eq!(reading.evidence_count, 2);
}

#[test]
fn pending_conflict_routes_to_resolver() {
    let mapper = Scripted::ok(
        "specification_mapper",
        AgentRole::Mapper,
        AgentProposal::new().with_constraint(ConstraintProposal::new("CNST_FANLESS")),
    );
    let resolver = Scripted::ok(
        "resolution_agent",
        AgentRole::Resolver,
        AgentProposal::new().with_confidence(0.95),
    );
    let (_, orch) = orchestrator(
        vec![erase(Arc::clone(&mapper)), erase(Arc::clone(&resolver))],
        OrchestratorConfig::default(),
    );

    orch.process_input("fanless", &[]);
    let pending = vec![ConflictDescriptor::UnresolvedMutex {
        constraint: ConstraintId::new("CNST_GPU_REQUIRED"),
        partner: ConstraintId::new("CNST_FANLESS"),
        agent: "specification_mapper".to_string(),
        message: "unresolved".to_string(),
        proposal: None,
    }];
    let result = orch.process_input("use the gpu", &pending);

    assert_eq!(mapper.calls(), 1);
    assert_eq!(resolver.calls(), 1);
    assert_eq!(result.agent_results.len(), 1);
    assert_eq!(result.agent_results[0].role, AgentRole::Resolver);
}

#[test]
fn session_round_survives_a_timed_out_agent() {
    let mapper = Scripted::ok(
        "specification_mapper",
        AgentRole::Mapper,
        AgentProposal::new()
            .with_use_case("UC3", 0.9)
            .with_confidence(0.9)
            .with_constraint(ConstraintProposal::new("CNST_RTOS")),
    );
    let config = SessionConfig::default().with_orchestrator(
        OrchestratorConfig::default().with_round_timeout(Duration::from_millis(150)),
    );
    let mut session = Session::new(
        "timeouts",
        &Catalog::builtin(),
        vec![
            erase(mapper),
            erase(Scripted::slow("constraint_validator", Duration::from_secs(5))),
        ],
        config,
    )
    .unwrap();

    let result = session.process_input("plc cabinet with rtos");
    assert!(!result.success);
    assert_eq!(session.get_active_constraints().len(), 1);
    assert_eq!(
        result.aggregated_confidence.contributing_agents,
        vec!["specification_mapper".to_string()]
    );
}

#[test]
fn dropping_a_session_does_not_wait_for_a_stuck_agent() {
    let (release_tx, release_rx) = bounded::<()>(0);
    let config = SessionConfig::default().with_orchestrator(
        OrchestratorConfig::default()
            .with_round_timeout(Duration::from_millis(100))
            .with_shutdown_grace(Duration::from_millis(100)),
    );
    let mut session = Session::new(
        "stuck",
        &Catalog::builtin(),
        vec![erase(Arc::new(Stubborn { release: release_rx }))],
        config,
    )
    .unwrap();

    let result = session.process_input("anything");
    assert!(result.agent_results[0].error().unwrap().is_timeout());

    let started = Instant::now();
    drop(session);
    assert!(started.elapsed() < Duration::from_secs(2));

    drop(release_tx);
}
