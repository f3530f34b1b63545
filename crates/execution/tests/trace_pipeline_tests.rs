//! Property-style integration tests over the trace pipeline: per-context
//! ordering, cross-context isolation under concurrency, and the full
//! record → finalize → integrity → result-hash flow.

use std::sync::Arc;
use std::time::Duration;

use ispc_config::BlockchainConfig;
use ispc_execution::{
    CallScope, ExecutionContextManager, ExecutionTrace, HostFunctionCall, StateChangeType,
    TraceValue,
};
use ispc_time::SystemClock;
use sha2::{Digest, Sha256};

const ZERO_CALLER: &str = "0000000000000000000000000000000000000000";

fn manager() -> Arc<ExecutionContextManager> {
    ExecutionContextManager::new(BlockchainConfig::default(), Arc::new(SystemClock::new()))
}

#[tokio::test]
async fn recording_order_is_preserved_in_the_buffers() {
    let manager = manager();
    let ctx = manager
        .create_context(&CallScope::default(), "ordered", ZERO_CALLER)
        .unwrap();
    for sequence in 0..500u64 {
        ctx.record_host_function_call(HostFunctionCall::new(sequence, "step"))
            .unwrap();
    }
    let trace = ctx.execution_trace();
    let sequences: Vec<u64> = trace.iter().map(|c| c.sequence).collect();
    assert_eq!(sequences, (0..500u64).collect::<Vec<_>>());

    // Timestamps never run backwards within one context.
    for pair in trace.windows(2) {
        assert!(pair[1].timestamp_ns >= pair[0].timestamp_ns);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_contexts_never_bleed_into_each_other() {
    let manager = manager();
    let mut tasks = Vec::new();
    for index in 0..8 {
        let manager = Arc::clone(&manager);
        tasks.push(tokio::spawn(async move {
            let execution_id = format!("iso-{index}");
            let ctx = manager
                .create_context(&CallScope::default(), &execution_id, ZERO_CALLER)
                .unwrap();
            for sequence in 0..100u64 {
                ctx.record_host_function_call(
                    HostFunctionCall::new(sequence, "work")
                        .with_parameters(TraceValue::map([("owner", index as i64)])),
                )
                .unwrap();
            }
            execution_id
        }));
    }
    let ids: Vec<String> = futures_join(tasks).await;

    for (index, execution_id) in ids.iter().enumerate() {
        let ctx = manager.get_context(execution_id).unwrap();
        let trace = ctx.execution_trace();
        assert_eq!(trace.len(), 100, "context {execution_id} lost records");
        for call in &trace {
            assert_eq!(
                call.parameters.get("owner"),
                Some(&TraceValue::Integer(index as i64)),
                "foreign record bled into {execution_id}"
            );
        }
    }
    for a in &ids {
        for b in &ids {
            if a != b {
                manager.verify_context_isolation(a, b).unwrap();
            }
        }
    }
}

async fn futures_join(tasks: Vec<tokio::task::JoinHandle<String>>) -> Vec<String> {
    let mut out = Vec::with_capacity(tasks.len());
    for task in tasks {
        out.push(task.await.unwrap());
    }
    out
}

#[tokio::test]
async fn full_invocation_flow_produces_a_consistent_result() {
    let manager = manager();
    let ctx = manager
        .create_context(&CallScope::default(), "flow", ZERO_CALLER)
        .unwrap();

    ctx.set_contract_address(&[7u8; 20]).unwrap();
    ctx.set_init_params(b"init");
    ctx.record_host_function_call(HostFunctionCall::new(1, "GetBlockHeight"))
        .unwrap();
    ctx.record_state_change(StateChangeType::UtxoCreate, "utxo:f:1", None, None)
        .unwrap();
    ctx.record_state_change(StateChangeType::UtxoSpend, "utxo:f:1", None, None)
        .unwrap();
    ctx.set_return_data(b"return-bytes");
    ctx.finalize_resource_usage();

    // Integrity over the live context.
    let trace = ExecutionTrace::from_context(&ctx, manager.services().now_ns());
    let report = manager.check_trace_integrity(&trace);
    assert!(report.is_valid, "issues: {:?}", report.issues);
    assert_eq!(report.host_call_count, 1);
    assert_eq!(report.state_change_count, 2);

    // Result hashing through the enforcer and the cross-run verifier.
    let result_hash: Vec<u8> = Sha256::digest(ctx.return_data()).to_vec();
    ctx.enforcer().set_result_hash(result_hash.clone()).unwrap();
    ctx.enforcer()
        .verify_execution_consistency(&result_hash)
        .unwrap();
    let input_hash = ctx.enforcer().input_hash().to_vec();
    manager
        .record_execution_result(&input_hash, &result_hash)
        .unwrap();
    manager
        .record_execution_result(&input_hash, &result_hash)
        .unwrap();
    assert_eq!(
        manager
            .result_verifier()
            .get(&input_hash)
            .unwrap()
            .occurrence_count,
        2
    );

    // A diverging rerun is rejected by both layers.
    assert!(ctx.enforcer().verify_execution_consistency(b"bogus").is_err());
    assert!(manager
        .record_execution_result(&input_hash, b"bogus-hash")
        .is_err());

    manager.destroy_context("flow").unwrap();
    assert!(manager.verify_context_cleanup("flow"));
}

#[tokio::test]
async fn trace_validation_rules_cover_live_contexts() {
    let manager = manager();
    let ctx = manager
        .create_context(&CallScope::default(), "rules", ZERO_CALLER)
        .unwrap();
    ctx.record_host_function_call(HostFunctionCall::new(5, "a"))
        .unwrap();
    // Engine contract violation: a lower sequence after a higher one.
    ctx.record_host_function_call(HostFunctionCall::new(4, "b"))
        .unwrap();
    ctx.finalize_resource_usage();

    let trace = ExecutionTrace::from_context(&ctx, manager.services().now_ns());
    let failures = manager.validate_trace(&trace);
    assert!(failures.iter().any(|f| f.contains("call order")));

    manager.register_trace_validation_rule("max_ten_calls", |trace| {
        if trace.host_calls.len() > 10 {
            Err(format!("{} host calls exceed the cap", trace.host_calls.len()))
        } else {
            Ok(())
        }
    });
    assert_eq!(manager.validate_trace(&trace).len(), failures.len());
}

#[tokio::test]
async fn replayed_traces_survive_context_destruction() {
    let manager = manager();
    let ctx = manager
        .create_context(&CallScope::default(), "post-mortem", ZERO_CALLER)
        .unwrap();
    ctx.record_host_function_call(HostFunctionCall::new(1, "only"))
        .unwrap();
    manager.record_trace_for_replay("post-mortem").unwrap();
    manager.destroy_context("post-mortem").unwrap();

    // The stored trace outlives the context.
    let mut names = Vec::new();
    manager
        .replay_trace("post-mortem", |op| {
            if let ispc_execution::trace::ReplayOperation::HostCall(call) = op {
                names.push(call.function_name.clone());
            }
            Ok(())
        })
        .unwrap();
    assert_eq!(names, vec!["only"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_drains_the_async_pipeline() {
    let manager = manager();
    manager
        .enable_async_trace_recording(
            2,
            50,
            Duration::from_millis(20),
            3,
            Duration::from_millis(5),
        )
        .await
        .unwrap();
    let ctx = manager
        .create_context(&CallScope::default(), "drained", ZERO_CALLER)
        .unwrap();
    for sequence in 0..120u64 {
        ctx.record_host_function_call(HostFunctionCall::new(sequence, "noop"))
            .unwrap();
    }
    manager
        .shutdown_with_timeout(Duration::from_millis(50))
        .await
        .unwrap();

    // Disable ran inside shutdown: every record was drained first.
    assert!(!manager.is_async_trace_recording_enabled());
    assert_eq!(ctx.execution_trace().len(), 120);
}
