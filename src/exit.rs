//! Process exit classification
//!
//! Operators can tell from the exit code why a run stopped.

use anyhow::Result;
use tokio::task::JoinError;
use tracing::error;

/// Process exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Every directory synced
    Success,
    /// Syncing failed with an error
    OrchestrationFailure,
    /// An asynchronous task panicked
    AsyncFault,
    /// The main thread panicked or startup could not proceed
    SyncFault,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::OrchestrationFailure => 1,
            ExitStatus::AsyncFault => 2,
            ExitStatus::SyncFault => 3,
        }
    }

    /// Classify the outcome of the task driving a sync run
    pub fn from_task(joined: std::result::Result<Result<()>, JoinError>) -> Self {
        match joined {
            Ok(Ok(())) => ExitStatus::Success,
            Ok(Err(e)) => {
                error!("{:#}", e);
                ExitStatus::OrchestrationFailure
            }
            Err(e) => {
                error!("sync task aborted: {}", e);
                ExitStatus::AsyncFault
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ExitStatus::Success.code(), 0);
        assert_eq!(ExitStatus::OrchestrationFailure.code(), 1);
        assert_eq!(ExitStatus::AsyncFault.code(), 2);
        assert_eq!(ExitStatus::SyncFault.code(), 3);
    }

    #[tokio::test]
    async fn test_classify_success_and_failure() {
        let ok = tokio::spawn(async { Ok::<(), anyhow::Error>(()) }).await;
        assert_eq!(ExitStatus::from_task(ok), ExitStatus::Success);

        let failed = tokio::spawn(async { Err::<(), _>(anyhow!("album service unreachable")) }).await;
        assert_eq!(
            ExitStatus::from_task(failed),
            ExitStatus::OrchestrationFailure
        );
    }

    #[tokio::test]
    async fn test_classify_task_panic() {
        let panicked = tokio::spawn(async {
            if true {
                panic!("boom");
            }
            Ok::<(), anyhow::Error>(())
        })
        .await;
        assert_eq!(ExitStatus::from_task(panicked), ExitStatus::AsyncFault);
    }
}
