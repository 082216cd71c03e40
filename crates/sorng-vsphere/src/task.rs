//! Task execution: submit, poll until terminal, report the outcome.

use crate::api::VimApi;
use crate::error::{VsphereError, VsphereResult};
use crate::types::*;

use std::future::Future;

/// Poll a task until it reaches a terminal state.
///
/// A task that ends in `error` is returned as `Err` carrying the task's
/// fault type, so callers can match on specific faults. There is no
/// timeout: the wait lasts as long as the control plane keeps the task
/// queued or running.
pub async fn wait_for_task(api: &dyn VimApi, task: &MoRef) -> VsphereResult<TaskState> {
    let interval = api.task_poll_interval();
    loop {
        let info = api.task_info(task).await?;
        match info.state {
            TaskState::Success => return Ok(TaskState::Success),
            TaskState::Error => {
                let err = match info.error {
                    Some(fault) => VsphereError::fault(fault.fault_type, fault.message),
                    None => VsphereError::task(format!("Task {} failed", task.value)),
                };
                return Err(err);
            }
            TaskState::Queued | TaskState::Running => {
                log::debug!("Task {} still {:?}", task.value, info.state);
                tokio::time::sleep(interval).await;
            }
        }
    }
}

/// Submit an operation, wait for its task and report whether it succeeded.
pub async fn execute_task<F>(api: &dyn VimApi, submit: F) -> VsphereResult<bool>
where
    F: Future<Output = VsphereResult<MoRef>>,
{
    let task = submit.await?;
    let state = wait_for_task(api, &task).await?;
    Ok(state == TaskState::Success)
}

/// Collapse a fallible operation into the boolean convention, logging the cause.
pub(crate) fn settle(operation: &str, result: VsphereResult<bool>) -> bool {
    match result {
        Ok(ok) => {
            if !ok {
                log::warn!("{operation}: task did not succeed");
            }
            ok
        }
        Err(e) => {
            log::warn!("{operation} failed: {e}");
            false
        }
    }
}

/// Collapse a fallible lookup into the `Option` convention, logging the cause.
pub(crate) fn settle_opt<T>(operation: &str, result: VsphereResult<Option<T>>) -> Option<T> {
    match result {
        Ok(value) => value,
        Err(e) => {
            log::warn!("{operation} failed: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockVimApi;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn task() -> MoRef {
        MoRef::new("Task", "task-101")
    }

    #[tokio::test]
    async fn polls_until_success() {
        let mut api = MockVimApi::new();
        api.expect_task_poll_interval().return_const(Duration::ZERO);
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        api.expect_task_info().returning(move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let state = match n {
                0 => TaskState::Queued,
                1 => TaskState::Running,
                _ => TaskState::Success,
            };
            Ok(TaskInfo { state, error: None })
        });

        let state = wait_for_task(&api, &task()).await.unwrap();
        assert_eq!(state, TaskState::Success);
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn error_state_surfaces_fault_type() {
        let mut api = MockVimApi::new();
        api.expect_task_poll_interval().return_const(Duration::ZERO);
        api.expect_task_info().returning(|_| {
            Ok(TaskInfo {
                state: TaskState::Error,
                error: Some(TaskFault {
                    fault_type: "CpuHotPlugNotSupported".into(),
                    message: "CPU hot plug is not supported for this virtual machine.".into(),
                }),
            })
        });

        let err = wait_for_task(&api, &task()).await.unwrap_err();
        assert!(err.is_fault("CpuHotPlugNotSupported"));
    }

    #[tokio::test]
    async fn execute_task_reports_submission_errors() {
        let mut api = MockVimApi::new();
        api.expect_task_info().never();
        let submit = async { Err(VsphereError::connection("socket closed")) };

        assert!(execute_task(&api, submit).await.is_err());
    }

    #[test]
    fn settle_maps_errors_to_false() {
        assert!(settle("op", Ok(true)));
        assert!(!settle("op", Ok(false)));
        assert!(!settle("op", Err(VsphereError::task("boom"))));
        assert_eq!(settle_opt::<u8>("op", Err(VsphereError::task("boom"))), None);
        assert_eq!(settle_opt("op", Ok(Some(3))), Some(3));
    }
}
