//! End-to-end tests over a real gRPC server on localhost.

mod test_harness;

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Endpoint;
use tonic::Code;

use swift_scheduler::config::{MasterConfig, WorkerConfig};
use swift_scheduler::error::SchedulerError;
use swift_scheduler::proto::master_message::Payload as MasterPayload;
use swift_scheduler::proto::scheduler_service_client::SchedulerServiceClient;
use swift_scheduler::proto::GetClusterLoadRequest;
use swift_scheduler::worker::WorkerAgent;
use test_harness::{register_msg, status_msg, wait_until, TestMaster};

fn agent_config(url: &str, worker_id: &str, max_concurrency: u32) -> WorkerConfig {
    WorkerConfig::new(url)
        .with_worker_id(worker_id)
        .with_max_concurrency(max_concurrency)
        .with_status_interval_ms(20)
}

#[tokio::test]
async fn test_raw_client_register_status_and_disconnect() {
    let master = TestMaster::start(MasterConfig::default()).await;
    let channel = Endpoint::new(master.url.clone())
        .unwrap()
        .connect()
        .await
        .unwrap();
    let mut client = SchedulerServiceClient::new(channel);

    let (tx, rx) = mpsc::channel(8);
    tx.send(register_msg("w1", 6)).await.unwrap();
    let mut inbound = client
        .connect(ReceiverStream::new(rx))
        .await
        .unwrap()
        .into_inner();

    let ack = inbound.message().await.unwrap().expect("register response");
    match ack.payload {
        Some(MasterPayload::RegisterResponse(resp)) => assert!(resp.success),
        other => panic!("expected RegisterResponse, got {:?}", other),
    }

    tx.send(status_msg("w1", 4)).await.unwrap();
    let registry = master.registry.clone();
    assert!(
        wait_until(Duration::from_secs(2), move || {
            registry
                .get("w1")
                .map(|w| w.active_task_count == 4)
                .unwrap_or(false)
        })
        .await
    );

    let load = client
        .get_cluster_load(GetClusterLoadRequest {})
        .await
        .unwrap()
        .into_inner();
    assert_eq!(load.active_tasks, 4);
    assert_eq!(load.total_capacity, 6);
    assert_eq!(load.workers.len(), 1);
    assert_eq!(load.workers[0].worker_id, "w1");
    assert_eq!(load.workers[0].hostname, "w1-host");

    // Closing the request stream ends the session
    drop(tx);
    let registry = master.registry.clone();
    assert!(wait_until(Duration::from_secs(2), move || registry.is_empty()).await);

    master.stop().await;
}

#[tokio::test]
async fn test_first_message_rejection_over_grpc() {
    let master = TestMaster::start(MasterConfig::default()).await;
    let channel = Endpoint::new(master.url.clone())
        .unwrap()
        .connect()
        .await
        .unwrap();
    let mut client = SchedulerServiceClient::new(channel);

    let (tx, rx) = mpsc::channel(8);
    tx.send(status_msg("w1", 1)).await.unwrap();

    // The status may surface on the call itself or on the first read
    let status = match client.connect(ReceiverStream::new(rx)).await {
        Err(status) => status,
        Ok(response) => {
            let mut inbound = response.into_inner();
            inbound
                .message()
                .await
                .expect_err("first message must be a registration")
        }
    };
    assert_eq!(status.code(), Code::FailedPrecondition);
    assert!(master.registry.is_empty());

    master.stop().await;
}

#[tokio::test]
async fn test_agent_registers_and_reports_status() {
    let master = TestMaster::start(MasterConfig::default()).await;
    let agent = WorkerAgent::new(agent_config(&master.url, "agent-1", 5));
    let active = agent.active_tasks();
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(agent.run(shutdown.clone()));

    let registry = master.registry.clone();
    assert!(wait_until(Duration::from_secs(2), move || registry.contains("agent-1")).await);
    let snap = master.registry.get("agent-1").unwrap();
    assert_eq!(snap.max_concurrency, 5);

    active.set(3);
    let registry = master.registry.clone();
    assert!(
        wait_until(Duration::from_secs(2), move || {
            registry
                .get("agent-1")
                .map(|w| w.active_task_count == 3)
                .unwrap_or(false)
        })
        .await
    );
    assert_eq!(master.registry.global_load().as_tuple(), (3, 5));

    shutdown.cancel();
    handle.await.unwrap().unwrap();

    let registry = master.registry.clone();
    assert!(wait_until(Duration::from_secs(2), move || registry.is_empty()).await);

    master.stop().await;
}

#[tokio::test]
async fn test_assignment_reaches_least_loaded_agent() {
    let master = TestMaster::start(MasterConfig::default()).await;
    let shutdown = CancellationToken::new();

    let (busy_tx, mut busy_rx) = mpsc::channel(4);
    let busy = WorkerAgent::new(agent_config(&master.url, "busy", 4)).with_assignments(busy_tx);
    busy.active_tasks().set(3);
    let busy_handle = tokio::spawn(busy.run(shutdown.clone()));

    let (idle_tx, mut idle_rx) = mpsc::channel(4);
    let idle = WorkerAgent::new(agent_config(&master.url, "idle", 4)).with_assignments(idle_tx);
    let idle_handle = tokio::spawn(idle.run(shutdown.clone()));

    // Wait for the busy worker's first status to land
    let registry = master.registry.clone();
    assert!(
        wait_until(Duration::from_secs(2), move || {
            registry.contains("idle")
                && registry
                    .get("busy")
                    .map(|w| w.active_task_count == 3)
                    .unwrap_or(false)
        })
        .await
    );

    let selected = master.registry.select().unwrap();
    assert_eq!(selected.worker_id, "idle");
    selected.assign("task-42").await.unwrap();

    let assignment = tokio::time::timeout(Duration::from_secs(2), idle_rx.recv())
        .await
        .expect("assignment in time")
        .expect("assignment channel open");
    assert_eq!(assignment.task_id, "task-42");
    assert!(busy_rx.try_recv().is_err());

    shutdown.cancel();
    busy_handle.await.unwrap().unwrap();
    idle_handle.await.unwrap().unwrap();
    master.stop().await;
}

#[tokio::test]
async fn test_aborted_agent_is_unregistered() {
    let master = TestMaster::start(MasterConfig::default()).await;
    let agent = WorkerAgent::new(agent_config(&master.url, "doomed", 2));
    let handle = tokio::spawn(agent.run(CancellationToken::new()));

    let registry = master.registry.clone();
    assert!(wait_until(Duration::from_secs(2), move || registry.contains("doomed")).await);

    handle.abort();
    let _ = handle.await;

    let registry = master.registry.clone();
    assert!(wait_until(Duration::from_secs(2), move || registry.is_empty()).await);

    master.stop().await;
}

#[tokio::test]
async fn test_agent_with_empty_id_is_rejected() {
    let master = TestMaster::start(MasterConfig::default()).await;
    let agent = WorkerAgent::new(agent_config(&master.url, "", 2));

    let result = tokio::time::timeout(Duration::from_secs(2), agent.run(CancellationToken::new()))
        .await
        .expect("agent finishes");
    assert!(matches!(result, Err(SchedulerError::RegistrationRejected(_))));
    assert!(master.registry.is_empty());

    master.stop().await;
}

#[tokio::test]
async fn test_idle_worker_is_evicted() {
    let master = TestMaster::start(MasterConfig::default().with_idle_timeout_ms(150)).await;
    let channel = Endpoint::new(master.url.clone())
        .unwrap()
        .connect()
        .await
        .unwrap();
    let mut client = SchedulerServiceClient::new(channel);

    let (tx, rx) = mpsc::channel(8);
    tx.send(register_msg("quiet", 3)).await.unwrap();
    let mut inbound = client
        .connect(ReceiverStream::new(rx))
        .await
        .unwrap()
        .into_inner();
    inbound.message().await.unwrap().expect("register response");
    assert!(master.registry.contains("quiet"));

    // Sender stays open but silent
    let registry = master.registry.clone();
    assert!(wait_until(Duration::from_secs(2), move || registry.is_empty()).await);

    // The master ends the response stream
    let next = tokio::time::timeout(Duration::from_secs(2), inbound.message())
        .await
        .expect("stream ends in time");
    assert!(!matches!(next, Ok(Some(_))));

    drop(tx);
    master.stop().await;
}

#[tokio::test]
async fn test_agent_status_keeps_worker_alive_under_idle_timeout() {
    let master = TestMaster::start(MasterConfig::default().with_idle_timeout_ms(300)).await;
    let agent = WorkerAgent::new(agent_config(&master.url, "chatty", 2));
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(agent.run(shutdown.clone()));

    let registry = master.registry.clone();
    assert!(wait_until(Duration::from_secs(2), move || registry.contains("chatty")).await);

    // Several timeout periods pass while status updates keep flowing
    tokio::time::sleep(Duration::from_millis(900)).await;
    assert!(master.registry.contains("chatty"));

    shutdown.cancel();
    handle.await.unwrap().unwrap();
    master.stop().await;
}
