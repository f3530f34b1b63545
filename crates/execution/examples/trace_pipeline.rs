//! End-to-end tour of the execution-context subsystem: create a manager,
//! run a traced invocation through the async pipeline, check integrity and
//! export the context snapshot.
//!
//! Run with: `cargo run --example trace_pipeline -p ispc-execution`

use std::sync::Arc;
use std::time::Duration;

use ispc_config::BlockchainConfig;
use ispc_execution::{
    CallScope, ExecutionContextManager, ExecutionTrace, HostFunctionCall, StateChangeType,
    TraceValue,
};
use ispc_time::SystemClock;

#[tokio::main]
async fn main() -> ispc_execution::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .init();

    let manager = ExecutionContextManager::new(
        BlockchainConfig::default(),
        Arc::new(SystemClock::new()),
    );
    manager.start_cleanup_task();
    manager
        .enable_async_trace_recording(
            2,
            100,
            Duration::from_millis(100),
            3,
            Duration::from_millis(10),
        )
        .await?;

    let ctx = manager.create_context(
        &CallScope::default(),
        "demo-1",
        "0000000000000000000000000000000000000000",
    )?;
    for sequence in 1..=5u64 {
        ctx.record_host_function_call(
            HostFunctionCall::new(sequence, "GetBlockHeight")
                .with_result(TraceValue::map([("height", 100 + sequence as i64)])),
        )?;
    }
    ctx.record_state_change(
        StateChangeType::UtxoCreate,
        "utxo:demo:1",
        None,
        Some(TraceValue::Integer(42)),
    )?;
    ctx.set_return_data(b"ok");
    manager.flush_trace_queue().await?;
    ctx.finalize_resource_usage();

    let trace = ExecutionTrace::from_context(&ctx, manager.services().now_ns());
    let report = manager.check_trace_integrity(&trace);
    println!(
        "trace valid: {} (hash {}, {} calls, {} state changes)",
        report.is_valid, report.trace_hash, report.host_call_count, report.state_change_count
    );

    let snapshot = manager.export_context_state("demo-1", false)?;
    println!("{}", String::from_utf8_lossy(&snapshot));

    manager.destroy_context("demo-1")?;
    manager.shutdown_with_timeout(Duration::from_secs(5)).await
}
