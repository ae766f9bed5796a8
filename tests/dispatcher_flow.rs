mod support;

use std::sync::Arc;

use pilot::dispatcher::{Dispatcher, InMemoryQueue, QueueLauncher, WorkQueue};
use pilot::task::{TaskStatus, TaskStore};

use support::{AgentScript, Harness, ScriptedAgent};

fn edit_readme() -> AgentScript {
    AgentScript::EditFiles(vec![("README.md".to_string(), "hello fixed\n".to_string())])
}

#[test]
fn scheduled_tasks_flow_through_workers_to_completion() {
    let harness = Harness::new(ScriptedAgent::new(edit_readme()));
    let queue: Arc<dyn WorkQueue> = Arc::new(InMemoryQueue::new());
    let launcher = QueueLauncher::new(Arc::clone(&queue));

    let task = harness
        .engine
        .schedule(harness.issue_request("Fix typo"), &launcher)
        .unwrap();

    let dispatcher = Arc::new(Dispatcher::new(harness.engine.clone(), Arc::clone(&queue)));
    let workers = dispatcher.spawn_workers(2);

    queue.close();
    for worker in workers {
        worker.join().unwrap();
    }

    let finished = harness.store.get(task.id).unwrap();
    assert_eq!(finished.status, TaskStatus::Completed);
    assert_eq!(harness.host.pull_requests.lock().unwrap().len(), 1);
}

#[test]
fn duplicate_queue_delivery_executes_the_task_once() {
    let harness = Harness::new(ScriptedAgent::new(edit_readme()));
    let queue: Arc<dyn WorkQueue> = Arc::new(InMemoryQueue::new());
    let launcher = QueueLauncher::new(Arc::clone(&queue));

    let task = harness
        .engine
        .schedule(harness.issue_request("Fix typo"), &launcher)
        .unwrap();
    // Simulate at-least-once delivery
    queue.push(task.id).unwrap();

    let dispatcher = Arc::new(Dispatcher::new(harness.engine.clone(), Arc::clone(&queue)));
    // Single worker, so the second delivery arrives after the first run
    let workers = dispatcher.spawn_workers(1);

    queue.close();
    for worker in workers {
        worker.join().unwrap();
    }

    let finished = harness.store.get(task.id).unwrap();
    assert_eq!(finished.status, TaskStatus::Completed);
    assert_eq!(harness.agent.invocations.lock().unwrap().len(), 1);
    assert_eq!(harness.host.pull_requests.lock().unwrap().len(), 1);
}
